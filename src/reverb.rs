use dasp::ring_buffer::Fixed;

use crate::error::{check_range, Result};

/// Comb line lengths in seconds
const COMB_DELAYS: [f32; 4] = [0.0297, 0.0371, 0.0411, 0.0437];
const ALLPASS_DELAYS: [f32; 2] = [0.005, 0.0017];
const ALLPASS_GAIN: f32 = 0.7;
/// One-pole lowpass inside each comb loop; darkens the tail
const COMB_DAMPING: f32 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReverbParameters {
    /// Per-reflection attenuation, 0.0 to just under 1.0
    pub decay: f32,
    /// 0.0 = dry, 1.0 = wet
    pub mix: f32,
}

impl Default for ReverbParameters {
    fn default() -> Self {
        Self::new(0.7, 0.5)
    }
}

impl ReverbParameters {
    pub fn new(decay: f32, mix: f32) -> Self {
        Self { decay, mix }
    }

    pub fn validate(&self) -> Result<()> {
        check_range("decay", self.decay, 0.0, 1.0, true)?;
        check_range("mix", self.mix, 0.0, 1.0, false)
    }
}

fn line(seconds: f32, sample_rate: f32) -> Fixed<Vec<f32>> {
    let samples = (seconds * sample_rate).round().max(1.0) as usize;
    Fixed::from(vec![0.0; samples])
}

// Feedback comb: y[n] = x[n - d], line <- x + g * lowpass(y)
struct CombFilter {
    line: Fixed<Vec<f32>>,
    filter_state: f32,
}

impl CombFilter {
    fn new(seconds: f32, sample_rate: f32) -> Self {
        Self {
            line: line(seconds, sample_rate),
            filter_state: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32, feedback: f32) -> f32 {
        let output = *self.line.get(0);
        self.filter_state = output * (1.0 - COMB_DAMPING) + self.filter_state * COMB_DAMPING;
        self.line.push(input + self.filter_state * feedback);
        output
    }
}

// Schroeder all-pass: unity magnitude response, smears the comb echoes
struct AllPassFilter {
    line: Fixed<Vec<f32>>,
    gain: f32,
}

impl AllPassFilter {
    fn new(seconds: f32, gain: f32, sample_rate: f32) -> Self {
        Self {
            line: line(seconds, sample_rate),
            gain,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let delayed = *self.line.get(0);
        let output = -self.gain * input + delayed;
        self.line.push(input + self.gain * delayed);
        output
    }
}

/// Four parallel damped combs feeding two series all-pass stages.
///
/// Each comb loop gain is at most `decay` (< 1) and the all-pass stages have gain
/// `0.7`, so reflection energy always dies away.
pub struct SchroederReverb {
    combs: [CombFilter; 4],
    allpasses: [AllPassFilter; 2],
    params: ReverbParameters,
}

impl SchroederReverb {
    pub fn new(params: ReverbParameters, sample_rate: f32) -> Self {
        Self {
            combs: COMB_DELAYS.map(|seconds| CombFilter::new(seconds, sample_rate)),
            allpasses: ALLPASS_DELAYS
                .map(|seconds| AllPassFilter::new(seconds, ALLPASS_GAIN, sample_rate)),
            params,
        }
    }

    pub fn parameters(&self) -> ReverbParameters {
        self.params
    }

    pub fn set_parameters(&mut self, params: ReverbParameters) {
        self.params = params;
    }

    #[inline]
    pub fn process_sample(&mut self, input: f32) -> f32 {
        let decay = self.params.decay;
        let mut comb_sum = 0.0;
        for comb in self.combs.iter_mut() {
            comb_sum += comb.process(input, decay);
        }
        let mut diffused = comb_sum / self.combs.len() as f32;
        for allpass in self.allpasses.iter_mut() {
            diffused = allpass.process(diffused);
        }
        (1.0 - self.params.mix) * input + self.params.mix * diffused
    }

    pub fn process(&mut self, block: &mut [f32]) {
        for sample in block.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 44_100.0;

    fn impulse_response(reverb: &mut SchroederReverb, len: usize) -> Vec<f32> {
        (0..len)
            .map(|n| reverb.process_sample(if n == 0 { 1.0 } else { 0.0 }))
            .collect()
    }

    fn window_energy(signal: &[f32], window: usize) -> Vec<f64> {
        signal
            .chunks(window)
            .map(|w| w.iter().map(|&s| (s as f64) * (s as f64)).sum())
            .collect()
    }

    #[test]
    fn mix_zero_is_dry() {
        let mut reverb = SchroederReverb::new(ReverbParameters::new(0.9, 0.0), SR);
        for n in 0..2000 {
            let x = (n as f32 * 0.01).sin() * 0.5;
            assert_eq!(reverb.process_sample(x), x);
        }
    }

    #[test]
    fn wet_output_appears_after_the_shortest_comb() {
        let mut reverb = SchroederReverb::new(ReverbParameters::new(0.7, 1.0), SR);
        let ir = impulse_response(&mut reverb, 4000);
        let first_comb = (0.0297 * SR).round() as usize;
        assert!(ir[..first_comb].iter().all(|&s| s == 0.0));
        // 1/4 of the impulse through both all-pass stages: (-0.7) * (-0.7) * 0.25
        assert!((ir[first_comb] - 0.1225).abs() < 1e-6);
    }

    #[test]
    fn reflection_energy_decreases_to_zero() {
        for &decay in &[0.3, 0.7, 0.9] {
            let mut reverb = SchroederReverb::new(ReverbParameters::new(decay, 1.0), SR);
            let ir = impulse_response(&mut reverb, 44_100 * 4);
            // half-second windows span many round trips of every comb
            let energy = window_energy(&ir, 22_050);
            for pair in energy.windows(2) {
                assert!(pair[1] <= pair[0], "decay {}: {:?}", decay, pair);
            }
            assert!(energy.last().unwrap() < &(energy[0] * 1e-3));
            assert!(ir.iter().all(|s| s.is_finite() && s.abs() <= 1.0));
        }
    }

    #[test]
    fn zero_decay_tail_dies_quickly() {
        let mut reverb = SchroederReverb::new(ReverbParameters::new(0.0, 1.0), SR);
        let ir = impulse_response(&mut reverb, 44_100);
        let tail: f32 = ir[22_050..].iter().map(|s| s.abs()).sum();
        assert!(tail < 1e-6);
    }

    #[test]
    fn validation() {
        assert!(ReverbParameters::default().validate().is_ok());
        assert!(ReverbParameters::new(0.0, 1.0).validate().is_ok());
        assert!(ReverbParameters::new(1.0, 0.5).validate().is_err());
        assert!(ReverbParameters::new(0.5, -0.5).validate().is_err());
        assert!(ReverbParameters::new(f32::NAN, 0.5).validate().is_err());
    }
}
