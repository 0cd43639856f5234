// Environment variables
pub const ENV_STORE_URL: &str = "BUILDER_STORE_URL";
pub const ENV_INFRASTRUCTURE_URL: &str = "BUILDER_INFRASTRUCTURE_URL";
pub const ENV_CONFIGURATION_URL: &str = "BUILDER_CONFIGURATION_URL";
pub const ENV_BOOTSTRAP_URL: &str = "BUILDER_BOOTSTRAP_URL";
pub const ENV_IN_CLUSTER_URL: &str = "BUILDER_IN_CLUSTER_URL";
pub const ENV_POLL_INTERVAL: &str = "BUILDER_POLL_INTERVAL";
pub const ENV_MAX_IN_FLIGHT: &str = "BUILDER_MAX_IN_FLIGHT";
pub const ENV_ENGINE_TIMEOUT: &str = "BUILDER_ENGINE_TIMEOUT";
pub const ENV_STORE_TIMEOUT: &str = "BUILDER_STORE_TIMEOUT";

// Defaults
pub const DEFAULT_POLL_INTERVAL: &str = "5s";
pub const DEFAULT_MAX_IN_FLIGHT: usize = 8;
pub const DEFAULT_ENGINE_TIMEOUT: &str = "1h";
pub const DEFAULT_STORE_TIMEOUT: &str = "30s";

/// How many times a whole-cluster destroy is attempted before the error is recorded.
pub const DESTROY_ATTEMPTS: u32 = 3;

// Backoff for commits rejected as conflicting writes, in milliseconds.
pub const COMMIT_BACKOFF_INITIAL_MS: u64 = 200;
pub const COMMIT_BACKOFF_MAX_MS: u64 = 10_000;
