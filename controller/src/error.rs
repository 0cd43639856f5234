use builder::clients::{EngineError, StoreError};
use snafu::Snafu;

pub(crate) type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub(crate) enum Error {
    #[snafu(display("Unable to create the {} engine client: {}", engine, source))]
    EngineClient {
        engine: &'static str,
        source: EngineError,
    },

    #[snafu(display("Invalid duration '{}'", value))]
    InvalidDuration { value: String },

    #[snafu(display("Invalid value '{}' for '{}': {}", value, name, source))]
    InvalidNumber {
        name: String,
        value: String,
        source: std::num::ParseIntError,
    },

    #[snafu(display("Invalid value for '{}': {}", name, source))]
    InvalidSetting { name: String, source: Box<Error> },

    #[snafu(display("Required environment variable '{}' is not set", name))]
    MissingEnv { name: String },

    #[snafu(display("Unable to create the task store client: {}", source))]
    StoreClient { source: StoreError },
}
