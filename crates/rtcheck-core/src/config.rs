//! Named numeric options and their resolution into probe configurations.
//!
//! Options are plain `name -> string` pairs gathered from environment
//! variables, a JSON file and command line assignments. Every lookup logs the
//! effective value; an absent or unparsable value falls back to the
//! documented default and is never fatal.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::probe::fairness::FairnessConfig;
use crate::probe::monotonic::MonotonicConfig;
use crate::probe::tick::TickConfig;
use crate::probe::timing::{ApplicationTimeConfig, MaxSleepConfig, SleepConfig, VisibleClockConfig};

/// Prefix shown in front of every option name in diagnostics.
pub const PROPERTY_PREFIX: &str = "rtcheck.";
/// Prefix of environment variables mapped onto options.
pub const ENV_PREFIX: &str = "RTCHECK_";

pub const ROUND_ROBIN_THREADS: &str = "round.robin.threads";
pub const ROUND_ROBIN_SECONDS: &str = "round.robin.seconds";
pub const ROUND_ROBIN_MIN_COUNTER: &str = "round.robin.min.counter";
pub const ROUND_ROBIN_MAX_DELTA_PERCENTAGE: &str = "round.robin.max.delta.percentage";
pub const CLOCK_SECONDS: &str = "clock.seconds";
pub const MONOTONIC_CHECK_SECONDS: &str = "monotonic.time.check.seconds";
pub const MAX_CLOCK_TICK_MS: &str = "max.allowed.clock.tick.duration.milliseconds";
pub const SLEEP_SECONDS: &str = "sleep.seconds";
pub const SAFETY_TIMEOUT_SECONDS: &str = "safety.timeout.seconds";

pub const DEFAULT_ROUND_ROBIN_THREADS: u64 = 4;
pub const DEFAULT_ROUND_ROBIN_SECONDS: u64 = 10;
pub const DEFAULT_ROUND_ROBIN_MIN_COUNTER: u64 = 500;
pub const DEFAULT_ROUND_ROBIN_MAX_DELTA_PERCENTAGE: u64 = 5;
pub const DEFAULT_CLOCK_SECONDS: u64 = 10;
pub const DEFAULT_MONOTONIC_CHECK_SECONDS: u64 = 60;
pub const DEFAULT_MAX_CLOCK_TICK_MS: u64 = 20;
pub const DEFAULT_SLEEP_SECONDS: u64 = 5;
pub const DEFAULT_SAFETY_TIMEOUT_SECONDS: u64 = 30;

/// Every option understood by the suite: name, default, unit.
pub const KNOWN_OPTIONS: &[(&str, u64, &str)] = &[
    (ROUND_ROBIN_THREADS, DEFAULT_ROUND_ROBIN_THREADS, "thread"),
    (ROUND_ROBIN_SECONDS, DEFAULT_ROUND_ROBIN_SECONDS, "second"),
    (ROUND_ROBIN_MIN_COUNTER, DEFAULT_ROUND_ROBIN_MIN_COUNTER, "increment"),
    (
        ROUND_ROBIN_MAX_DELTA_PERCENTAGE,
        DEFAULT_ROUND_ROBIN_MAX_DELTA_PERCENTAGE,
        "percent",
    ),
    (CLOCK_SECONDS, DEFAULT_CLOCK_SECONDS, "second"),
    (MONOTONIC_CHECK_SECONDS, DEFAULT_MONOTONIC_CHECK_SECONDS, "second"),
    (MAX_CLOCK_TICK_MS, DEFAULT_MAX_CLOCK_TICK_MS, "millisecond"),
    (SLEEP_SECONDS, DEFAULT_SLEEP_SECONDS, "second"),
    (SAFETY_TIMEOUT_SECONDS, DEFAULT_SAFETY_TIMEOUT_SECONDS, "second"),
];

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("failed to read option file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("option file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("option file must contain a JSON object of scalar values")]
    NotAnObject,
    #[error("option `{0}` has a non-scalar value")]
    NonScalar(String),
    #[error("expected `name=value`, got `{0}`")]
    Assignment(String),
}

/// Where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Default,
    Set,
    /// The option was set to something unparsable; the default was used.
    Fallback { raw: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved<T> {
    pub value: T,
    pub origin: Origin,
}

impl Resolved<u64> {
    /// Diagnostic line for the resolution of option `name`.
    pub fn describe(&self, name: &str, default: u64, unit: &str) -> String {
        let property = format!("{PROPERTY_PREFIX}{name}");
        match &self.origin {
            Origin::Default => format!(
                "Property '{property}' is not set (default to '{default}' {})",
                plural(unit, default)
            ),
            Origin::Set => format!(
                "Property '{property}' is set to '{}' {}",
                self.value,
                plural(unit, self.value)
            ),
            Origin::Fallback { raw } => format!(
                "Property '{property}' is invalid (set to '{raw}', default to '{default}' {})",
                plural(unit, default)
            ),
        }
    }
}

/// Raw option values keyed by option name (without [`PROPERTY_PREFIX`]).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    values: BTreeMap<String, String>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.values
            .insert(normalize_name(name.as_ref()), value.into());
    }

    pub fn with(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn raw(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Overlays `other` on top of `self`; values from `other` win.
    pub fn merge(&mut self, other: Options) {
        self.values.extend(other.values);
    }

    /// Options from the process environment (`RTCHECK_CLOCK_SECONDS` maps to
    /// `clock.seconds`).
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut options = Self::new();
        for (key, value) in vars {
            if let Some(stripped) = key.as_ref().strip_prefix(ENV_PREFIX) {
                if stripped.is_empty() {
                    continue;
                }
                let name = stripped.to_ascii_lowercase().replace('_', ".");
                options.set(name, value);
            }
        }
        options
    }

    /// Parses a JSON object whose values are strings, numbers or booleans.
    pub fn from_json_str(text: &str) -> Result<Self, OptionsError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(map) = value else {
            return Err(OptionsError::NotAnObject);
        };
        let mut options = Self::new();
        for (name, value) in map {
            let raw = match value {
                Value::String(text) => text,
                Value::Number(number) => number.to_string(),
                Value::Bool(flag) => flag.to_string(),
                _ => return Err(OptionsError::NonScalar(name)),
            };
            options.set(name, raw);
        }
        Ok(options)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, OptionsError> {
        let text = fs::read_to_string(path).map_err(|source| OptionsError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Splits a `name=value` command line assignment.
    pub fn parse_assignment(text: &str) -> Result<(String, String), OptionsError> {
        match text.split_once('=') {
            Some((name, value)) if !name.trim().is_empty() => {
                Ok((normalize_name(name.trim()), value.trim().to_string()))
            }
            _ => Err(OptionsError::Assignment(text.to_string())),
        }
    }

    /// Resolves an unsigned option, logging the effective value.
    pub fn resolve_u64(&self, name: &str, default: u64, unit: &str) -> Resolved<u64> {
        let resolved = match self.raw(name) {
            None => Resolved {
                value: default,
                origin: Origin::Default,
            },
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(value) => Resolved {
                    value,
                    origin: Origin::Set,
                },
                Err(_) => Resolved {
                    value: default,
                    origin: Origin::Fallback {
                        raw: raw.to_string(),
                    },
                },
            },
        };
        let message = resolved.describe(name, default, unit);
        match resolved.origin {
            Origin::Fallback { .. } => warn!("{message}"),
            _ => info!("{message}"),
        }
        resolved
    }

    pub fn get_u64(&self, name: &str, default: u64, unit: &str) -> u64 {
        self.resolve_u64(name, default, unit).value
    }

    /// Option names that are set but not understood by the suite.
    pub fn unknown(&self) -> Vec<&str> {
        self.values
            .keys()
            .map(String::as_str)
            .filter(|name| !KNOWN_OPTIONS.iter().any(|(known, _, _)| known == name))
            .collect()
    }
}

fn normalize_name(name: &str) -> String {
    name.strip_prefix(PROPERTY_PREFIX).unwrap_or(name).to_string()
}

fn plural(unit: &str, value: u64) -> String {
    if value > 1 && unit != "percent" {
        format!("{unit}s")
    } else {
        unit.to_string()
    }
}

/// Effective configuration of every probe in the suite.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuiteConfig {
    pub fairness: FairnessConfig,
    pub monotonic: MonotonicConfig,
    pub tick: TickConfig,
    pub visible_clock: VisibleClockConfig,
    pub sleep: SleepConfig,
    pub application_time: ApplicationTimeConfig,
    pub max_sleep: MaxSleepConfig,
}

impl SuiteConfig {
    /// Resolves every known option, falling back to defaults.
    pub fn resolve(options: &Options) -> Self {
        for name in options.unknown() {
            warn!("Property '{PROPERTY_PREFIX}{name}' is not a known option and is ignored");
        }

        let threads = options.get_u64(ROUND_ROBIN_THREADS, DEFAULT_ROUND_ROBIN_THREADS, "thread");
        let rr_seconds = options.get_u64(ROUND_ROBIN_SECONDS, DEFAULT_ROUND_ROBIN_SECONDS, "second");
        let min_counter = options.get_u64(
            ROUND_ROBIN_MIN_COUNTER,
            DEFAULT_ROUND_ROBIN_MIN_COUNTER,
            "increment",
        );
        let max_delta = options.get_u64(
            ROUND_ROBIN_MAX_DELTA_PERCENTAGE,
            DEFAULT_ROUND_ROBIN_MAX_DELTA_PERCENTAGE,
            "percent",
        );
        let clock_seconds = options.get_u64(CLOCK_SECONDS, DEFAULT_CLOCK_SECONDS, "second");
        let monotonic_seconds = options.get_u64(
            MONOTONIC_CHECK_SECONDS,
            DEFAULT_MONOTONIC_CHECK_SECONDS,
            "second",
        );
        let tick_ms = options.get_u64(MAX_CLOCK_TICK_MS, DEFAULT_MAX_CLOCK_TICK_MS, "millisecond");
        let sleep_seconds = options.get_u64(SLEEP_SECONDS, DEFAULT_SLEEP_SECONDS, "second");
        let safety_seconds = options.get_u64(
            SAFETY_TIMEOUT_SECONDS,
            DEFAULT_SAFETY_TIMEOUT_SECONDS,
            "second",
        );

        let tick_limit = Duration::from_millis(tick_ms);
        let safety = Duration::from_secs(safety_seconds);
        let sleep_delay = Duration::from_secs(sleep_seconds);

        Self {
            fairness: FairnessConfig {
                workers: usize::try_from(threads).unwrap_or(usize::MAX),
                duration: Duration::from_secs(rr_seconds),
                min_counter,
                max_imbalance_pct: max_delta,
            },
            monotonic: MonotonicConfig {
                duration: Duration::from_secs(monotonic_seconds),
                safety_margin: safety,
                ..MonotonicConfig::default()
            },
            tick: TickConfig {
                limit: tick_limit,
                safety_timeout: safety,
            },
            visible_clock: VisibleClockConfig {
                duration: Duration::from_secs(clock_seconds),
                limit: tick_limit,
                safety_margin: safety,
            },
            sleep: SleepConfig {
                delay: sleep_delay,
                limit: tick_limit,
            },
            application_time: ApplicationTimeConfig {
                delay: sleep_delay,
                ..ApplicationTimeConfig::default()
            },
            max_sleep: MaxSleepConfig::default(),
        }
    }
}

#[cfg(feature = "fuzzing")]
pub fn fuzz_parse_options(data: &[u8]) {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(options) = Options::from_json_str(text) {
            let _ = SuiteConfig::resolve(&options);
        }
        for line in text.lines() {
            let _ = Options::parse_assignment(line);
        }
    }
}
