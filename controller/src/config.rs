use crate::error::{self, Result};
use builder::DispatchSettings;
use reconciler_model::constants::{
    DEFAULT_ENGINE_TIMEOUT, DEFAULT_MAX_IN_FLIGHT, DEFAULT_POLL_INTERVAL, DEFAULT_STORE_TIMEOUT,
    ENV_BOOTSTRAP_URL, ENV_CONFIGURATION_URL, ENV_ENGINE_TIMEOUT, ENV_INFRASTRUCTURE_URL,
    ENV_IN_CLUSTER_URL, ENV_MAX_IN_FLIGHT, ENV_POLL_INTERVAL, ENV_STORE_TIMEOUT, ENV_STORE_URL,
};
use snafu::{ensure, OptionExt, ResultExt};
use std::time::Duration;

const UNITS: [(char, u64); 3] = [('d', 86400), ('h', 3600), ('m', 60)];

/// Process settings, read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Config {
    pub(crate) store_url: String,
    pub(crate) infrastructure_url: String,
    pub(crate) configuration_url: String,
    pub(crate) bootstrap_url: String,
    pub(crate) in_cluster_url: String,
    pub(crate) poll_interval: Duration,
    pub(crate) max_in_flight: usize,
    /// Timeout for a single engine call. Provisioning and bootstrap take minutes.
    pub(crate) engine_timeout: Duration,
    pub(crate) store_timeout: Duration,
}

impl Config {
    pub(crate) fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| lookup(name).context(error::MissingEnvSnafu { name });
        let duration = |name: &str, default: &str| {
            parse_duration(&lookup(name).unwrap_or_else(|| default.to_string()))
                .map_err(Box::new)
                .context(error::InvalidSettingSnafu { name })
        };
        let max_in_flight = match lookup(ENV_MAX_IN_FLIGHT) {
            Some(value) => value.trim().parse().context(error::InvalidNumberSnafu {
                name: ENV_MAX_IN_FLIGHT,
                value: &value,
            })?,
            None => DEFAULT_MAX_IN_FLIGHT,
        };

        Ok(Self {
            store_url: required(ENV_STORE_URL)?,
            infrastructure_url: required(ENV_INFRASTRUCTURE_URL)?,
            configuration_url: required(ENV_CONFIGURATION_URL)?,
            bootstrap_url: required(ENV_BOOTSTRAP_URL)?,
            in_cluster_url: required(ENV_IN_CLUSTER_URL)?,
            poll_interval: duration(ENV_POLL_INTERVAL, DEFAULT_POLL_INTERVAL)?,
            max_in_flight,
            engine_timeout: duration(ENV_ENGINE_TIMEOUT, DEFAULT_ENGINE_TIMEOUT)?,
            store_timeout: duration(ENV_STORE_TIMEOUT, DEFAULT_STORE_TIMEOUT)?,
        })
    }

    pub(crate) fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            poll_interval: self.poll_interval,
            max_in_flight: self.max_in_flight,
            ..DispatchSettings::default()
        }
    }
}

/// Parse a duration such as `1h30m` or `45s`. A bare number is taken as seconds.
pub(crate) fn parse_duration(input: &str) -> Result<Duration> {
    let invalid = || error::InvalidDurationSnafu { value: input };
    let mut rest = input.trim();
    ensure!(!rest.is_empty(), invalid());
    let mut secs: u64 = 0;
    for (unit, factor) in UNITS {
        if let Some((value, remainder)) = rest.split_once(unit) {
            secs = value
                .parse::<u64>()
                .ok()
                .and_then(|value| value.checked_mul(factor))
                .and_then(|value| secs.checked_add(value))
                .context(invalid())?;
            rest = remainder;
        }
    }
    let seconds = rest.strip_suffix('s').unwrap_or(rest);
    if !seconds.is_empty() {
        secs = seconds
            .parse::<u64>()
            .ok()
            .and_then(|value| secs.checked_add(value))
            .context(invalid())?;
    }
    Ok(Duration::from_secs(secs))
}
