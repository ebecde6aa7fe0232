use std::time::Duration;

use crate::delay::DelayParameters;
use crate::error::{EngineError, Result};
use crate::reverb::ReverbParameters;

pub const MAX_SAMPLE_RATE: u32 = 384_000;
pub const MAX_CHANNELS: u16 = 32;
pub const MAX_BLOCK_FRAMES: usize = 16_384;
pub const MAX_VOICES: usize = 4_096;
pub const MAX_COMMAND_CAPACITY: usize = 65_536;
pub const MAX_DELAY_SECONDS: f32 = 60.0;

/// Output format and capacity limits for one engine session.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames produced per render step.
    pub block_frames: usize,
    /// Preallocated voice slots on the render side.
    pub max_voices: usize,
    /// Length of the preallocated delay line.
    pub max_delay_seconds: f32,
    /// Pending control messages before calls start failing with `QueueFull`.
    pub command_capacity: usize,
    /// Share of a step's playback time it may take before counting as an overrun.
    pub render_budget_fraction: f64,
    /// How long the device may go without pulling a step before the session is
    /// considered lost.
    pub device_timeout: Duration,
    pub delay: DelayParameters,
    pub reverb: ReverbParameters,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            block_frames: 256,
            max_voices: 64,
            max_delay_seconds: 2.0,
            command_capacity: 256,
            render_budget_fraction: 1.0,
            device_timeout: Duration::from_secs(1),
            delay: DelayParameters::default(),
            reverb: ReverbParameters::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults, overridden by `OSC_ENGINE_SAMPLE_RATE`, `OSC_ENGINE_BLOCK_FRAMES`
    /// and `OSC_ENGINE_MAX_VOICES` when they parse.
    pub fn from_env() -> Self {
        fn read<T: std::str::FromStr>(key: &str) -> Option<T> {
            let raw = std::env::var(key).ok()?;
            match raw.trim().parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(key, raw, "ignoring unparsable override");
                    None
                }
            }
        }

        let mut config = Self::default();
        if let Some(rate) = read("OSC_ENGINE_SAMPLE_RATE") {
            config.sample_rate = rate;
        }
        if let Some(frames) = read("OSC_ENGINE_BLOCK_FRAMES") {
            config.block_frames = frames;
        }
        if let Some(voices) = read("OSC_ENGINE_MAX_VOICES") {
            config.max_voices = voices;
        }
        config
    }

    /// Every size is bounded so buffers allocated from it stay reasonable.
    pub fn validate(&self) -> Result<()> {
        let within = |name: &'static str, value: f64, max: f64| {
            if value > 0.0 && value <= max {
                Ok(())
            } else {
                Err(EngineError::InvalidParameter {
                    name,
                    value,
                    reason: "must be positive and within the supported limit",
                })
            }
        };

        within("sample_rate", self.sample_rate as f64, MAX_SAMPLE_RATE as f64)?;
        within("channels", self.channels as f64, MAX_CHANNELS as f64)?;
        within("block_frames", self.block_frames as f64, MAX_BLOCK_FRAMES as f64)?;
        within("max_voices", self.max_voices as f64, MAX_VOICES as f64)?;
        within(
            "command_capacity",
            self.command_capacity as f64,
            MAX_COMMAND_CAPACITY as f64,
        )?;
        within("render_budget_fraction", self.render_budget_fraction, 1.0)?;
        if self.device_timeout <= self.block_period() {
            return Err(EngineError::InvalidParameter {
                name: "device_timeout",
                value: self.device_timeout.as_secs_f64(),
                reason: "must be longer than one render step",
            });
        }
        // zero is allowed: it leaves only the bypassed delay
        if !(self.max_delay_seconds >= 0.0 && self.max_delay_seconds <= MAX_DELAY_SECONDS) {
            return Err(EngineError::InvalidParameter {
                name: "max_delay_seconds",
                value: self.max_delay_seconds as f64,
                reason: "must be between 0 and 60 seconds",
            });
        }
        self.delay.validate(self.max_delay_seconds)?;
        self.reverb.validate()
    }

    pub fn max_delay_samples(&self) -> usize {
        (self.max_delay_seconds * self.sample_rate as f32).round() as usize
    }

    /// Wall-clock time the device takes to play one render step.
    pub fn block_period(&self) -> Duration {
        Duration::from_secs_f64(self.block_frames as f64 / self.sample_rate as f64)
    }
}
