/// Stage of an [`Adsr`] contour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeStage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// ADSR times in seconds and the sustain level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopeSettings {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

/// Linear ADSR generator timed in whole samples.
///
/// Every segment is a straight line between its start and end level. Elapsed time is
/// clamped to the segment length, so the output never leaves `[0, 1]`. A segment that
/// rounds to zero samples is skipped in the same step it is entered.
#[derive(Debug, Clone)]
pub struct Adsr {
    attack_samples: u32,
    decay_samples: u32,
    release_samples: u32,
    sustain: f32,
    stage: EnvelopeStage,
    elapsed: u32,
    level: f32,
    release_from: f32,
}

impl Adsr {
    pub fn new(settings: EnvelopeSettings, sample_rate: f32) -> Self {
        let to_samples = |seconds: f32| (seconds as f64 * sample_rate as f64).round() as u32;
        Self {
            attack_samples: to_samples(settings.attack),
            decay_samples: to_samples(settings.decay),
            release_samples: to_samples(settings.release),
            sustain: settings.sustain,
            stage: EnvelopeStage::Idle,
            elapsed: 0,
            level: 0.0,
            release_from: 0.0,
        }
    }

    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }

    /// Level produced by the most recent [`Adsr::next_value`].
    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn is_idle(&self) -> bool {
        self.stage == EnvelopeStage::Idle
    }

    /// Idle -> Attack. Retriggering restarts the attack from zero.
    pub fn trigger(&mut self) {
        self.enter(EnvelopeStage::Attack);
    }

    /// Note-off: ramps from the current level down to zero.
    pub fn release(&mut self) {
        if matches!(self.stage, EnvelopeStage::Idle | EnvelopeStage::Release) {
            return;
        }
        self.release_from = self.level;
        self.enter(EnvelopeStage::Release);
    }

    /// Value for the current sample, then advances one sample.
    pub fn next_value(&mut self) -> f32 {
        let value = match self.stage {
            EnvelopeStage::Idle => 0.0,
            EnvelopeStage::Attack => progress(self.elapsed, self.attack_samples),
            EnvelopeStage::Decay => {
                1.0 - (1.0 - self.sustain) * progress(self.elapsed, self.decay_samples)
            }
            EnvelopeStage::Sustain => self.sustain,
            EnvelopeStage::Release => {
                self.release_from * (1.0 - progress(self.elapsed, self.release_samples))
            }
        };
        self.level = value;

        if let Some(length) = self.stage_length() {
            self.elapsed += 1;
            if self.elapsed >= length {
                self.enter(next_stage(self.stage));
            }
        }
        value
    }

    /// `None` for stages that hold until an external event.
    fn stage_length(&self) -> Option<u32> {
        match self.stage {
            EnvelopeStage::Attack => Some(self.attack_samples),
            EnvelopeStage::Decay => Some(self.decay_samples),
            EnvelopeStage::Release => Some(self.release_samples),
            EnvelopeStage::Idle | EnvelopeStage::Sustain => None,
        }
    }

    fn enter(&mut self, stage: EnvelopeStage) {
        self.stage = stage;
        self.elapsed = 0;
        // zero-length segments jump straight to their end level
        while self.stage_length() == Some(0) {
            self.level = match self.stage {
                EnvelopeStage::Attack => 1.0,
                EnvelopeStage::Decay => self.sustain,
                _ => 0.0,
            };
            self.stage = next_stage(self.stage);
        }
    }
}

fn next_stage(stage: EnvelopeStage) -> EnvelopeStage {
    match stage {
        EnvelopeStage::Attack => EnvelopeStage::Decay,
        EnvelopeStage::Decay => EnvelopeStage::Sustain,
        EnvelopeStage::Release => EnvelopeStage::Idle,
        held => held,
    }
}

#[inline]
fn progress(elapsed: u32, length: u32) -> f32 {
    (elapsed.min(length) as f32 / length as f32).clamp(0.0, 1.0)
}
