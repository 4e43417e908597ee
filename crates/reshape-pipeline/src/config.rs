use std::env;
use std::num::NonZeroUsize;
use std::thread;

use crate::error::ConfigError;

pub const MAX_WORKERS_VAR: &str = "RESHAPE_MAX_WORKERS";
pub const CHUNK_DIVISOR_VAR: &str = "RESHAPE_CHUNK_DIVISOR";
pub const SHUTDOWN_VAR: &str = "RESHAPE_SHUTDOWN";

/// What a worker pool does with queued work when it is shut down.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Run everything already queued, then join the workers.
    #[default]
    Drain,
    /// Discard queued work and let in-flight jobs finish on their own threads.
    Detach,
}

/// Worker pool sizing shared by the shader and pipeline compilers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Upper bound on lazily spawned worker threads.
    pub max_workers: usize,
    /// A batch of `n` jobs is split into chunks of `max(1, n / (max_workers * chunk_divisor))`.
    pub chunk_divisor: usize,
    pub shutdown: ShutdownMode,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(4),
            chunk_divisor: 3,
            shutdown: ShutdownMode::Drain,
        }
    }
}

impl SchedulerConfig {
    /// Defaults overridden by `RESHAPE_MAX_WORKERS`, `RESHAPE_CHUNK_DIVISOR` and
    /// `RESHAPE_SHUTDOWN` (`drain` or `detach`).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let max_workers = match lookup(MAX_WORKERS_VAR) {
            Some(value) => parse_count(MAX_WORKERS_VAR, &value)?,
            None => defaults.max_workers,
        };
        let chunk_divisor = match lookup(CHUNK_DIVISOR_VAR) {
            Some(value) => parse_count(CHUNK_DIVISOR_VAR, &value)?,
            None => defaults.chunk_divisor,
        };
        let shutdown = match lookup(SHUTDOWN_VAR) {
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "drain" => ShutdownMode::Drain,
                "detach" => ShutdownMode::Detach,
                _ => return Err(invalid(SHUTDOWN_VAR, &value)),
            },
            None => defaults.shutdown,
        };
        Ok(Self {
            max_workers,
            chunk_divisor,
            shutdown,
        })
    }

    pub(crate) fn chunk_size(&self, jobs: usize) -> usize {
        let segments = self.max_workers.max(1) * self.chunk_divisor.max(1);
        (jobs / segments).max(1)
    }
}

fn parse_count(var: &'static str, value: &str) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(count) if count > 0 => Ok(count),
        _ => Err(invalid(var, value)),
    }
}

fn invalid(var: &'static str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        var,
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |var| {
            pairs
                .iter()
                .find(|(name, _)| *name == var)
                .map(|(_, value)| value.to_string())
        }
    }

    #[test]
    fn unset_variables_keep_defaults() {
        let config = SchedulerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, SchedulerConfig::default());
        assert!(config.max_workers >= 1);
    }

    #[test]
    fn overrides_are_trimmed_and_parsed() {
        let config = SchedulerConfig::from_lookup(lookup(&[
            (MAX_WORKERS_VAR, " 2 "),
            (CHUNK_DIVISOR_VAR, "5"),
            (SHUTDOWN_VAR, "Detach"),
        ]))
        .unwrap();
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.chunk_divisor, 5);
        assert_eq!(config.shutdown, ShutdownMode::Detach);
    }

    #[test]
    fn malformed_values_name_the_variable() {
        let err = SchedulerConfig::from_lookup(lookup(&[(MAX_WORKERS_VAR, "0")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                var: MAX_WORKERS_VAR,
                value: "0".into()
            }
        );
        assert!(SchedulerConfig::from_lookup(lookup(&[(CHUNK_DIVISOR_VAR, "many")])).is_err());
        assert!(SchedulerConfig::from_lookup(lookup(&[(SHUTDOWN_VAR, "later")])).is_err());
    }

    #[test]
    fn chunks_never_drop_below_one_job() {
        let config = SchedulerConfig {
            max_workers: 2,
            chunk_divisor: 3,
            shutdown: ShutdownMode::Drain,
        };
        assert_eq!(config.chunk_size(0), 1);
        assert_eq!(config.chunk_size(5), 1);
        assert_eq!(config.chunk_size(12), 2);
        assert_eq!(config.chunk_size(100), 16);
    }
}
