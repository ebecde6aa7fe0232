use std::f32::consts::TAU;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaveType {
    Sine,
    Square,
    Sawtooth,
}

impl WaveType {
    pub const ALL: [WaveType; 3] = [WaveType::Sine, WaveType::Square, WaveType::Sawtooth];

    /// Index order used by the control form's type selector.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Unit-amplitude value of the waveform at `phase` radians, `phase` in `[0, 2π)`.
    #[inline]
    pub fn evaluate(self, phase: f32) -> f32 {
        match self {
            WaveType::Sine => phase.sin(),
            WaveType::Square => {
                let s = phase.sin();
                if s > 0.0 {
                    1.0
                } else if s < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            }
            WaveType::Sawtooth => 2.0 * (phase / TAU) - 1.0,
        }
    }
}

/// Naive (non band-limited) phase-accumulator oscillator.
#[derive(Debug, Clone)]
pub struct Oscillator {
    wave_type: WaveType,
    amplitude: f32,
    phase: f32,
    phase_increment: f32,
}

impl Oscillator {
    pub fn new(wave_type: WaveType, frequency: f32, amplitude: f32, sample_rate: f32) -> Self {
        let phase_increment = (std::f64::consts::TAU * frequency as f64 / sample_rate as f64) as f32;
        Self {
            wave_type,
            amplitude,
            phase: 0.0,
            phase_increment,
        }
    }

    pub fn phase(&self) -> f32 {
        self.phase
    }

    #[inline]
    pub fn next_sample(&mut self) -> f32 {
        let sample = self.amplitude * self.wave_type.evaluate(self.phase);
        self.advance();
        sample
    }

    /// Writes `out.len()` consecutive samples.
    pub fn fill(&mut self, out: &mut [f32]) {
        for sample in out.iter_mut() {
            *sample = self.next_sample();
        }
    }

    #[inline]
    fn advance(&mut self) {
        self.phase += self.phase_increment;
        if self.phase >= TAU {
            self.phase = self.phase.rem_euclid(TAU);
            // rem_euclid can round up to exactly TAU
            if self.phase >= TAU {
                self.phase = 0.0;
            }
        }
    }
}
