use std::fmt;

use crate::envelope::{Adsr, EnvelopeSettings, EnvelopeStage};
use crate::error::{check_range, EngineError, Result};
use crate::oscillator::{Oscillator, WaveType};

/// Handle returned by `add_oscillator`, unique within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceId(pub u64);

impl fmt::Display for VoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Everything `add_oscillator` takes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceSettings {
    pub wave_type: WaveType,
    /// Hz, > 0
    pub frequency: f32,
    /// 0.0 to 1.0
    pub amplitude: f32,
    /// Seconds, >= 0
    pub attack: f32,
    /// Seconds, >= 0
    pub decay: f32,
    /// 0.0 to 1.0
    pub sustain: f32,
    /// Seconds, >= 0
    pub release: f32,
}

impl Default for VoiceSettings {
    // Values the control form starts with
    fn default() -> Self {
        Self {
            wave_type: WaveType::Sine,
            frequency: 440.0,
            amplitude: 1.0,
            attack: 0.1,
            decay: 0.1,
            sustain: 0.7,
            release: 0.2,
        }
    }
}

impl VoiceSettings {
    pub fn new(
        wave_type: WaveType,
        frequency: f32,
        amplitude: f32,
        attack: f32,
        decay: f32,
        sustain: f32,
        release: f32,
    ) -> Self {
        Self {
            wave_type,
            frequency,
            amplitude,
            attack,
            decay,
            sustain,
            release,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.frequency.is_finite() && self.frequency > 0.0) {
            return Err(EngineError::InvalidParameter {
                name: "frequency",
                value: self.frequency as f64,
                reason: "must be a positive number of Hz",
            });
        }
        check_range("amplitude", self.amplitude, 0.0, 1.0, false)?;
        check_range("attack", self.attack, 0.0, f32::MAX, false)?;
        check_range("decay", self.decay, 0.0, f32::MAX, false)?;
        check_range("sustain", self.sustain, 0.0, 1.0, false)?;
        check_range("release", self.release, 0.0, f32::MAX, false)
    }

    pub fn envelope(&self) -> EnvelopeSettings {
        EnvelopeSettings {
            attack: self.attack,
            decay: self.decay,
            sustain: self.sustain,
            release: self.release,
        }
    }
}

/// One oscillator paired with its envelope.
#[derive(Debug, Clone)]
pub struct Voice {
    id: VoiceId,
    oscillator: Oscillator,
    envelope: Adsr,
}

impl Voice {
    /// Builds a voice that starts its attack on the first rendered sample.
    pub fn new(id: VoiceId, settings: &VoiceSettings, sample_rate: f32) -> Self {
        let oscillator = Oscillator::new(
            settings.wave_type,
            settings.frequency,
            settings.amplitude,
            sample_rate,
        );
        let mut envelope = Adsr::new(settings.envelope(), sample_rate);
        envelope.trigger();

        Self {
            id,
            oscillator,
            envelope,
        }
    }

    pub fn id(&self) -> VoiceId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        !self.envelope.is_idle()
    }

    pub fn stage(&self) -> EnvelopeStage {
        self.envelope.stage()
    }

    pub fn note_off(&mut self) {
        self.envelope.release();
    }

    /// Raw waveform times the envelope.
    #[inline]
    pub fn next_sample(&mut self) -> f32 {
        if !self.is_active() {
            return 0.0;
        }
        let envelope_value = self.envelope.next_value();
        self.oscillator.next_sample() * envelope_value
    }

    /// Adds `out.len()` samples of this voice into `out`, using `scratch` for the raw
    /// waveform. Both slices must be the same length.
    pub fn render_add(&mut self, out: &mut [f32], scratch: &mut [f32]) {
        if !self.is_active() {
            return;
        }
        self.oscillator.fill(scratch);
        for (acc, raw) in out.iter_mut().zip(scratch.iter()) {
            *acc += raw * self.envelope.next_value();
        }
    }
}
