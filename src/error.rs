use std::time::Duration;

use crate::voice::VoiceId;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid parameter `{name}` = {value}: {reason}")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },

    #[error("audio device error: {0}")]
    DeviceError(String),

    #[error("{count} render steps overran their {budget:?} budget (worst {worst:?})")]
    RenderOverrun {
        count: u64,
        budget: Duration,
        worst: Duration,
    },

    #[error("unknown voice {0}")]
    UnknownVoice(VoiceId),

    #[error("command queue to the render thread is full")]
    QueueFull,

    #[error("an audio session is already active")]
    AlreadyActive,
}

impl From<rodio::StreamError> for EngineError {
    fn from(err: rodio::StreamError) -> Self {
        EngineError::DeviceError(err.to_string())
    }
}

impl From<rodio::PlayError> for EngineError {
    fn from(err: rodio::PlayError) -> Self {
        EngineError::DeviceError(err.to_string())
    }
}

/// Checks `value` lies in `[min, max]` (or `[min, max)` when `max_exclusive`).
/// NaN and infinities are always rejected.
pub(crate) fn check_range(
    name: &'static str,
    value: f32,
    min: f32,
    max: f32,
    max_exclusive: bool,
) -> Result<()> {
    let reject = |reason| {
        Err(EngineError::InvalidParameter {
            name,
            value: value as f64,
            reason,
        })
    };

    if !value.is_finite() {
        return reject("must be a finite number");
    }
    if value < min {
        return reject("below allowed range");
    }
    if value > max || (max_exclusive && value >= max) {
        return reject("above allowed range");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_check_edges() {
        assert!(check_range("mix", 0.0, 0.0, 1.0, false).is_ok());
        assert!(check_range("mix", 1.0, 0.0, 1.0, false).is_ok());
        assert!(check_range("feedback", 1.0, 0.0, 1.0, true).is_err());
        assert!(check_range("feedback", 0.999, 0.0, 1.0, true).is_ok());
        assert!(check_range("decay", -0.01, 0.0, 1.0, true).is_err());
        assert!(check_range("decay", f32::NAN, 0.0, 1.0, true).is_err());
        assert!(check_range("attack", f32::INFINITY, 0.0, f32::MAX, false).is_err());
    }

    #[test]
    fn invalid_parameter_names_the_field() {
        let err = check_range("mix", 2.0, 0.0, 1.0, false).unwrap_err();
        assert!(err.to_string().contains("mix"));
    }
}
