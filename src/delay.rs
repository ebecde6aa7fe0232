use dasp::ring_buffer::Fixed;

use crate::error::{check_range, EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayParameters {
    /// Seconds between echoes
    pub delay_time: f32,
    /// 0.0 to just under 1.0
    pub feedback: f32,
    /// 0.0 = dry, 1.0 = wet
    pub mix: f32,
}

impl Default for DelayParameters {
    fn default() -> Self {
        Self::new(0.5, 0.5, 0.5)
    }
}

impl DelayParameters {
    pub fn new(delay_time: f32, feedback: f32, mix: f32) -> Self {
        Self {
            delay_time,
            feedback,
            mix,
        }
    }

    /// Feedback must stay below one so every echo is quieter than the last.
    pub fn validate(&self, max_delay_seconds: f32) -> Result<()> {
        check_range("delay_time", self.delay_time, 0.0, f32::MAX, false)?;
        if self.delay_time > max_delay_seconds {
            return Err(EngineError::InvalidParameter {
                name: "delay_time",
                value: self.delay_time as f64,
                reason: "longer than the allocated delay line",
            });
        }
        check_range("feedback", self.feedback, 0.0, 1.0, true)?;
        check_range("mix", self.mix, 0.0, 1.0, false)
    }
}

/// Feedback delay over a line allocated once at its maximum length.
///
/// `wet = x + feedback * line[n - d]`, the line stores `wet`, and the output blends
/// `(1 - mix) * x + mix * wet`. Changing the delay time only moves the read offset.
pub struct FeedbackDelay {
    line: Fixed<Vec<f32>>,
    delay_samples: usize,
    params: DelayParameters,
    sample_rate: f32,
}

impl FeedbackDelay {
    pub fn new(max_delay_samples: usize, params: DelayParameters, sample_rate: f32) -> Self {
        let mut delay = Self {
            line: Fixed::from(vec![0.0; max_delay_samples.max(1)]),
            delay_samples: 0,
            params,
            sample_rate,
        };
        delay.set_parameters(params);
        delay
    }

    pub fn parameters(&self) -> DelayParameters {
        self.params
    }

    pub fn delay_samples(&self) -> usize {
        self.delay_samples
    }

    /// Takes parameters already validated on the control side. The delay length is
    /// capped to the line as a last guard.
    pub fn set_parameters(&mut self, params: DelayParameters) {
        let samples = (params.delay_time as f64 * self.sample_rate as f64).round() as usize;
        self.delay_samples = samples.min(self.line.len());
        self.params = params;
    }

    #[inline]
    pub fn process_sample(&mut self, input: f32) -> f32 {
        let wet = if self.delay_samples == 0 {
            input
        } else {
            let delayed = *self.line.get(self.line.len() - self.delay_samples);
            input + self.params.feedback * delayed
        };
        self.line.push(wet);
        (1.0 - self.params.mix) * input + self.params.mix * wet
    }

    pub fn process(&mut self, block: &mut [f32]) {
        for sample in block.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }
}
