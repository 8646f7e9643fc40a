//! Proxy Configuration Settings
//!
//! Configuration types for the gateway and the stream manager, loaded from
//! environment variables. Unset or empty variables fall back to defaults;
//! values that are present but unparsable are rejected.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::application::services::{ReconnectConfig, StreamManagerConfig};
use crate::domain::credentials::{
    CredentialPrecedence, CredentialRule, MissingCredentialPolicy, default_rules,
};
use crate::domain::streaming::StreamConfig;

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Port serving `/proxy`, health and metrics.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

/// Forwarding gateway settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewaySettings {
    /// Which side wins when caller and rule set the same header.
    pub precedence: CredentialPrecedence,
    /// What to do when a matched rule has no value.
    pub missing_credential: MissingCredentialPolicy,
    /// Outbound request timeout (`None` = client default).
    pub upstream_timeout: Option<Duration>,
    /// JSON file with extra credential rules.
    pub rules_file: Option<PathBuf>,
}

/// Stream manager settings.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    /// Stream endpoint (`None` = stream disabled).
    pub url: Option<String>,
    /// Consumer enable flag.
    pub enabled: bool,
    /// Minimum spacing between delivered messages.
    pub throttle_interval: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Jitter factor in `[0, 1]`.
    pub reconnect_jitter: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for StreamSettings {
    fn default() -> Self {
        let reconnect = ReconnectConfig::default();
        Self {
            url: None,
            enabled: true,
            throttle_interval: Duration::from_millis(1000),
            reconnect_delay_initial: reconnect.initial_delay,
            reconnect_delay_max: reconnect.max_delay,
            reconnect_delay_multiplier: reconnect.multiplier,
            reconnect_jitter: reconnect.jitter_factor,
            max_reconnect_attempts: reconnect.max_attempts,
        }
    }
}

impl StreamSettings {
    /// Consumer inputs for the manager.
    #[must_use]
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            url: self.url.clone(),
            enabled: self.enabled,
        }
    }
}

impl From<&StreamSettings> for ReconnectConfig {
    fn from(settings: &StreamSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            jitter_factor: settings.reconnect_jitter,
            max_attempts: settings.max_reconnect_attempts,
        }
    }
}

impl From<&StreamSettings> for StreamManagerConfig {
    fn from(settings: &StreamSettings) -> Self {
        Self {
            throttle_interval: settings.throttle_interval,
            reconnect: settings.into(),
        }
    }
}

/// Complete proxy configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProxyConfig {
    /// Server port settings.
    pub server: ServerSettings,
    /// Gateway settings.
    pub gateway: GatewaySettings,
    /// Stream settings.
    pub stream: StreamSettings,
}

impl ProxyConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an invalid value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let server = ServerSettings {
            port: env.parse("GATEWAY_PORT", ServerSettings::default().port)?,
        };

        let gateway = GatewaySettings {
            precedence: env
                .get("GATEWAY_CREDENTIAL_PRECEDENCE")
                .map(|s| CredentialPrecedence::from_str_case_insensitive(&s))
                .unwrap_or_default(),
            missing_credential: env
                .get("GATEWAY_MISSING_CREDENTIAL")
                .map(|s| MissingCredentialPolicy::from_str_case_insensitive(&s))
                .unwrap_or_default(),
            upstream_timeout: env
                .parse_opt::<u64>("GATEWAY_UPSTREAM_TIMEOUT_SECS")?
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            rules_file: env.get("GATEWAY_CREDENTIAL_RULES_FILE").map(PathBuf::from),
        };

        let defaults = StreamSettings::default();
        let stream = StreamSettings {
            url: env.get("STREAM_URL"),
            enabled: env.parse_bool("STREAM_ENABLED", defaults.enabled)?,
            throttle_interval: env.millis("STREAM_THROTTLE_MS", defaults.throttle_interval)?,
            reconnect_delay_initial: env.millis(
                "STREAM_RECONNECT_DELAY_INITIAL_MS",
                defaults.reconnect_delay_initial,
            )?,
            reconnect_delay_max: env.secs(
                "STREAM_RECONNECT_DELAY_MAX_SECS",
                defaults.reconnect_delay_max,
            )?,
            reconnect_delay_multiplier: env.parse(
                "STREAM_RECONNECT_DELAY_MULTIPLIER",
                defaults.reconnect_delay_multiplier,
            )?,
            reconnect_jitter: env.parse("STREAM_RECONNECT_JITTER", defaults.reconnect_jitter)?,
            max_reconnect_attempts: env.parse(
                "STREAM_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            )?,
        };

        if stream.reconnect_delay_initial.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "STREAM_RECONNECT_DELAY_INITIAL_MS".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        if stream.reconnect_delay_max.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "STREAM_RECONNECT_DELAY_MAX_SECS".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&stream.reconnect_jitter) {
            return Err(ConfigError::InvalidValue {
                key: "STREAM_RECONNECT_JITTER".to_string(),
                reason: "must be between 0 and 1".to_string(),
            });
        }
        if !stream.reconnect_delay_multiplier.is_finite() || stream.reconnect_delay_multiplier < 1.0
        {
            return Err(ConfigError::InvalidValue {
                key: "STREAM_RECONNECT_DELAY_MULTIPLIER".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            server,
            gateway,
            stream,
        })
    }

    /// Built-in credential rules followed by those from the rules file.
    ///
    /// # Errors
    ///
    /// Returns an error if the rules file cannot be read or is invalid.
    pub fn load_credential_rules(&self) -> Result<Vec<CredentialRule>, ConfigError> {
        let mut rules = default_rules();
        if let Some(path) = &self.gateway.rules_file {
            rules.extend(read_rules_file(path)?);
        }
        Ok(rules)
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has a value that cannot be used.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What was wrong.
        reason: String,
    },
    /// Rules file could not be read.
    #[error("failed to read credential rules from {path}: {source}")]
    RulesFileRead {
        /// File path.
        path: PathBuf,
        /// I/O error.
        source: std::io::Error,
    },
    /// Rules file is not valid JSON of the expected shape.
    #[error("failed to parse credential rules from {path}: {source}")]
    RulesFileParse {
        /// File path.
        path: PathBuf,
        /// JSON error.
        source: serde_json::Error,
    },
    /// A rule entry is structurally valid JSON but unusable.
    #[error("invalid credential rule #{index}: {reason}")]
    InvalidRule {
        /// Zero-based position in the file.
        index: usize,
        /// What was wrong.
        reason: String,
    },
}

// =============================================================================
// Rules file
// =============================================================================

/// One entry of the rules file.
///
/// ```json
/// [{ "match": "polygon.io", "header": "Authorization", "env": "POLYGON_API_KEY" },
///  { "match": "twelvedata.com", "query_param": "apikey", "env": "TWELVE_DATA_KEY" }]
/// ```
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleEntry {
    #[serde(rename = "match")]
    url_contains: String,
    #[serde(default)]
    header: Option<String>,
    #[serde(default)]
    query_param: Option<String>,
    env: String,
}

impl RuleEntry {
    fn into_rule(self, index: usize) -> Result<CredentialRule, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidRule {
            index,
            reason: reason.to_string(),
        };

        if self.url_contains.trim().is_empty() {
            return Err(invalid("\"match\" must not be empty"));
        }
        if self.env.trim().is_empty() {
            return Err(invalid("\"env\" must not be empty"));
        }

        match (self.header, self.query_param) {
            (Some(header), None) if !header.trim().is_empty() => {
                Ok(CredentialRule::header(self.url_contains, header, self.env))
            }
            (None, Some(param)) if !param.trim().is_empty() => {
                Ok(CredentialRule::query_param(self.url_contains, param, self.env))
            }
            _ => Err(invalid(
                "exactly one non-empty \"header\" or \"query_param\" is required",
            )),
        }
    }
}

fn read_rules_file(path: &Path) -> Result<Vec<CredentialRule>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::RulesFileRead {
        path: path.to_path_buf(),
        source,
    })?;
    parse_rules(&text).map_err(|e| match e {
        RulesError::Json(source) => ConfigError::RulesFileParse {
            path: path.to_path_buf(),
            source,
        },
        RulesError::Config(e) => e,
    })
}

enum RulesError {
    Json(serde_json::Error),
    Config(ConfigError),
}

fn parse_rules(text: &str) -> Result<Vec<CredentialRule>, RulesError> {
    let entries: Vec<RuleEntry> = serde_json::from_str(text).map_err(RulesError::Json)?;
    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| entry.into_rule(index).map_err(RulesError::Config))
        .collect()
}

// =============================================================================
// Parsing helpers
// =============================================================================

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse_opt<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key)
            .map(|raw| {
                raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: format!("{raw:?}: {e}"),
                })
            })
            .transpose()
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        Ok(self.parse_opt(key)?.unwrap_or(default))
    }

    fn parse_bool(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        let Some(raw) = self.get(key) else {
            return Ok(default);
        };
        match raw.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                reason: format!("{raw:?} is not a boolean"),
            }),
        }
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        Ok(self
            .parse_opt::<u64>(key)?
            .map_or(default, Duration::from_secs))
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        Ok(self
            .parse_opt::<u64>(key)?
            .map_or(default, Duration::from_millis))
    }
}
