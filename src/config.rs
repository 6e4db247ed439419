//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;
use crate::identity::MoodDelta;

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Maximum number of appendages in flight at once.
    pub max_appendages: usize,
    /// Timeout applied to tasks that don't carry their own.
    pub default_timeout: Option<Duration>,
    /// Capacity of each worker's message mailbox.
    pub message_buffer: usize,
    /// Capacity of the event broadcast channel.
    pub event_buffer: usize,
    /// Mood nudge applied after a successful task.
    pub success_mood: MoodDelta,
    /// Mood nudge applied after a failed task.
    pub failure_mood: MoodDelta,
    /// Pause between steps of the built-in strategies.
    pub step_delay: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_appendages: 5,
            default_timeout: None,
            message_buffer: 32,
            event_buffer: 256,
            success_mood: MoodDelta {
                valence: 0.05,
                arousal: 0.0,
            },
            failure_mood: MoodDelta {
                valence: -0.05,
                arousal: 0.05,
            },
            step_delay: Duration::from_millis(50),
        }
    }
}

impl CoordinatorConfig {
    /// Build a config from `APPENDAGE_*` environment variables, falling back
    /// to defaults for anything unset.
    pub fn from_env() -> crate::error::Result<Self> {
        Ok(Self::from_lookup(|key| std::env::var(key).ok())?)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_appendages = parse_nonzero(
            &lookup,
            "APPENDAGE_MAX_CONCURRENT",
            defaults.max_appendages,
        )?;
        let message_buffer =
            parse_nonzero(&lookup, "APPENDAGE_MESSAGE_BUFFER", defaults.message_buffer)?;
        let event_buffer = parse_nonzero(&lookup, "APPENDAGE_EVENT_BUFFER", defaults.event_buffer)?;

        let default_timeout = match lookup("APPENDAGE_DEFAULT_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = parse_value("APPENDAGE_DEFAULT_TIMEOUT_SECS", &raw)?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            None => defaults.default_timeout,
        };

        let step_delay = match lookup("APPENDAGE_STEP_DELAY_MS") {
            Some(raw) => Duration::from_millis(parse_value("APPENDAGE_STEP_DELAY_MS", &raw)?),
            None => defaults.step_delay,
        };

        Ok(Self {
            max_appendages,
            default_timeout,
            message_buffer,
            event_buffer,
            step_delay,
            ..defaults
        })
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("cannot parse {raw:?}"),
    })
}

fn parse_nonzero(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: usize,
) -> Result<usize, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    let value: usize = parse_value(key, &raw)?;
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}
