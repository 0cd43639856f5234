/*!

The `builder` library reconciles a Kubernetes cluster, and the load balancers in front of it, from
its current state towards its desired state.

- [`plan`] decides whether a direct transition is safe and, if it is not, computes the intermediate
  state to pass through first.
- [`Builder`] drives a reconciliation pass through the external engines stage by stage, persisting
  the cluster's [`Workflow`] before every stage.
- [`Dispatcher`] polls the task store, runs one pass per task and commits the result.

External engines and the task store are reached through the traits in [`clients`] so that fakes
can be injected for testing.

!*/

#![deny(
    clippy::expect_used,
    clippy::get_unwrap,
    clippy::panic,
    clippy::panic_in_result_fn,
    clippy::panicking_unwrap,
    clippy::unwrap_in_result,
    clippy::unwrap_used
)]

pub mod clients;
mod context;
pub mod dispatch;
mod error;
pub mod plan;
mod workflow;

pub use context::BuilderContext;
pub use dispatch::{DispatchSettings, Dispatcher, TaskOutcome};
pub use error::{Error, Result};
pub use plan::{plan, IntermediateRepresentation, IntermediateState};
pub use reconciler_model::Workflow;
pub use workflow::{Builder, Engines};
