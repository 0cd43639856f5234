use crate::clients::EngineError;
use reconciler_model::Stage;
use snafu::Snafu;

/// The `Result` type returned by the builder.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type returned by the builder.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display(
        "Infrastructure for cluster '{}' was only partially built, the reached state was recorded",
        cluster
    ))]
    FailedToBuildInfrastructure { cluster: String },

    #[snafu(display(
        "Error during {} ({}) of cluster '{}' in config '{}': {}",
        stage,
        step,
        cluster,
        config,
        source
    ))]
    Stage {
        stage: Stage,
        step: String,
        cluster: String,
        config: String,
        source: EngineError,
    },

    #[snafu(display("Work on cluster '{}' was interrupted before {}", cluster, stage))]
    Interrupted { cluster: String, stage: Stage },

    #[snafu(display("Cluster '{}' is gone: {} no longer exists", cluster, what))]
    Vanished { cluster: String, what: String },

    #[snafu(display("Cluster '{}' has no {} state", cluster, which))]
    MissingState {
        cluster: String,
        which: &'static str,
    },

    #[snafu(display(
        "Unable to find a control node of cluster '{}' that can take over the api endpoint",
        cluster
    ))]
    NoEndpointReplacement { cluster: String },

    #[snafu(display(
        "Node '{}' of node pool '{}' in cluster '{}' cannot become the api endpoint",
        node,
        nodepool,
        cluster
    ))]
    InvalidEndpointTarget {
        cluster: String,
        nodepool: String,
        node: String,
    },

    #[snafu(display("Invalid api endpoint in cluster '{}': {}", cluster, source))]
    ApiEndpoint {
        cluster: String,
        source: reconciler_model::Error,
    },
}

impl Error {
    /// Shutdown was requested before the work finished. The workflow record is left as it is.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Interrupted { .. })
    }

    /// The cluster or task was deleted while being worked on. There is nothing left to record.
    pub fn is_vanished(&self) -> bool {
        matches!(self, Error::Vanished { .. })
    }

    /// The infrastructure engine reported a partial result which is already folded into the
    /// context's current state.
    pub fn is_partial_infrastructure(&self) -> bool {
        matches!(self, Error::FailedToBuildInfrastructure { .. })
    }
}
