use std::sync::Arc;
use std::time::{Duration, Instant};

use rodio::Source;

use crate::command::{EngineCommand, SharedState};
use crate::config::EngineConfig;
use crate::delay::{DelayParameters, FeedbackDelay};
use crate::mixer::{limit, Placement, VoiceMixer};
use crate::reverb::{ReverbParameters, SchroederReverb};
use crate::voice::Voice;

/// The render side of a session: oscillators -> envelopes -> mixer -> delay -> reverb.
///
/// All buffers are sized from [`EngineConfig`] at construction; a render step only
/// touches preallocated memory. Plays through rodio as an endless interleaved
/// [`Source`], or can be pulled directly with [`SynthRenderer::render`].
pub struct SynthRenderer {
    shared: Arc<SharedState>,
    mixer: VoiceMixer,
    delay: FeedbackDelay,
    reverb: SchroederReverb,
    mono: Vec<f32>,
    interleaved: Vec<f32>,
    position: usize,
    channels: u16,
    sample_rate: u32,
    budget_fraction: f64,
}

impl SynthRenderer {
    pub(crate) fn new(
        config: &EngineConfig,
        shared: Arc<SharedState>,
        delay: DelayParameters,
        reverb: ReverbParameters,
        voices: impl IntoIterator<Item = Voice>,
    ) -> Self {
        let sample_rate = config.sample_rate as f32;
        let mut mixer = VoiceMixer::new(config.max_voices, config.block_frames);
        for voice in voices {
            record_placement(&shared, mixer.add(voice));
        }
        shared.publish_active_voices(mixer.active_voice_count());

        let block_samples = config.block_frames * config.channels as usize;
        Self {
            shared,
            mixer,
            delay: FeedbackDelay::new(config.max_delay_samples(), delay, sample_rate),
            reverb: SchroederReverb::new(reverb, sample_rate),
            mono: vec![0.0; config.block_frames],
            interleaved: vec![0.0; block_samples],
            position: block_samples,
            channels: config.channels,
            sample_rate: config.sample_rate,
            budget_fraction: config.render_budget_fraction,
        }
    }

    pub fn delay_parameters(&self) -> DelayParameters {
        self.delay.parameters()
    }

    pub fn reverb_parameters(&self) -> ReverbParameters {
        self.reverb.parameters()
    }

    pub fn active_voice_count(&self) -> usize {
        self.mixer.active_voice_count()
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// One render step into an interleaved buffer.
    ///
    /// Applies pending control messages, then synthesizes `out.len() / channels` frames.
    /// Trailing samples that do not fill a whole frame are zeroed. Once the session has
    /// been cleaned up this writes silence and returns `false`.
    pub fn render(&mut self, out: &mut [f32]) -> bool {
        if !self.shared.begin_render() {
            out.fill(0.0);
            return false;
        }
        let started = Instant::now();

        self.apply_commands();

        let channels = self.channels as usize;
        let frames = out.len() / channels;
        let (whole, partial) = out.split_at_mut(frames * channels);
        partial.fill(0.0);

        for chunk in whole.chunks_mut(self.mono.len() * channels) {
            let mono = &mut self.mono[..chunk.len() / channels];
            self.mixer.render(mono);
            self.delay.process(mono);
            self.reverb.process(mono);
            for (frame, sample) in chunk.chunks_exact_mut(channels).zip(mono.iter()) {
                frame.fill(limit(*sample));
            }
        }

        self.shared.publish_active_voices(self.mixer.active_voice_count());
        self.shared.add_frames_rendered(frames as u64);

        let budget = Duration::from_secs_f64(
            frames as f64 / self.sample_rate as f64 * self.budget_fraction,
        );
        let elapsed = started.elapsed();
        if elapsed > budget {
            self.shared.record_overrun(elapsed);
        }
        self.shared.end_render();
        true
    }

    fn apply_commands(&mut self) {
        // bounded so a flooding control thread cannot stall the step
        for _ in 0..self.shared.command_capacity() {
            let Some(command) = self.shared.pop() else {
                break;
            };
            match command {
                EngineCommand::AddVoice(voice) => {
                    record_placement(&self.shared, self.mixer.add(voice));
                }
                EngineCommand::NoteOff(id) => {
                    self.mixer.note_off(id);
                }
                EngineCommand::RemoveVoice(id) => {
                    self.mixer.remove(id);
                }
                EngineCommand::ReleaseAll => self.mixer.release_all(),
                EngineCommand::SetDelay(params) => self.delay.set_parameters(params),
                EngineCommand::SetReverb(params) => self.reverb.set_parameters(params),
            }
        }
    }
}

fn record_placement(shared: &SharedState, placement: Placement) {
    if let Placement::Stolen(_) = placement {
        shared.record_stolen_voice();
    }
    if let Some(id) = placement.displaced() {
        shared.retire_voice(id);
    }
}

impl Iterator for SynthRenderer {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.interleaved.len() {
            let mut block = std::mem::take(&mut self.interleaved);
            let running = self.render(&mut block);
            self.interleaved = block;
            if !running {
                // ends the source so the output mixer drops it
                return None;
            }
            self.position = 0;
        }
        let sample = self.interleaved[self.position];
        self.position += 1;
        Some(sample)
    }
}

impl Source for SynthRenderer {
    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_frame_len(&self) -> Option<usize> {
        None // Infinite source
    }

    fn total_duration(&self) -> Option<Duration> {
        None // Infinite duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oscillator::WaveType;
    use crate::voice::{VoiceId, VoiceSettings};

    fn dry_config() -> EngineConfig {
        EngineConfig {
            block_frames: 64,
            delay: DelayParameters::new(0.1, 0.0, 0.0),
            reverb: ReverbParameters::new(0.0, 0.0),
            ..EngineConfig::default()
        }
    }

    fn renderer(config: &EngineConfig, voices: Vec<Voice>) -> (SynthRenderer, Arc<SharedState>) {
        let shared = Arc::new(SharedState::new(config.command_capacity, config.max_voices));
        let renderer = SynthRenderer::new(
            config,
            Arc::clone(&shared),
            config.delay,
            config.reverb,
            voices,
        );
        (renderer, shared)
    }

    #[test]
    fn silent_without_voices() {
        let (mut renderer, shared) = renderer(&dry_config(), Vec::new());
        let mut out = vec![1.0; 512];
        assert!(renderer.render(&mut out));
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(shared.frames_rendered(), 256);
    }

    #[test]
    fn mono_mix_is_duplicated_on_every_channel() {
        let config = dry_config();
        let settings = VoiceSettings {
            wave_type: WaveType::Sawtooth,
            attack: 0.0,
            decay: 0.0,
            sustain: 1.0,
            ..VoiceSettings::default()
        };
        let voice = Voice::new(VoiceId(1), &settings, config.sample_rate as f32);
        let (mut renderer, _) = renderer(&config, vec![voice]);

        // longer than one block and ending in half a frame
        let mut out = vec![0.5; 301];
        renderer.render(&mut out);
        assert_eq!(out[0], -1.0);
        for frame in out[..300].chunks(2) {
            assert_eq!(frame[0], frame[1]);
        }
        assert_eq!(out[300], 0.0);
        assert!(out[2] > out[0]);
    }

    #[test]
    fn commands_are_applied_at_the_start_of_a_step() {
        let config = dry_config();
        let (mut renderer, shared) = renderer(&config, Vec::new());
        let settings = VoiceSettings::default();
        shared
            .push(EngineCommand::AddVoice(Voice::new(VoiceId(9), &settings, 44_100.0)))
            .unwrap();
        shared
            .push(EngineCommand::SetDelay(DelayParameters::new(0.25, 0.4, 0.3)))
            .unwrap();
        shared
            .push(EngineCommand::SetReverb(ReverbParameters::new(0.2, 0.1)))
            .unwrap();

        let mut out = vec![0.0; 128];
        renderer.render(&mut out);
        assert_eq!(renderer.active_voice_count(), 1);
        assert_eq!(shared.active_voices(), 1);
        assert_eq!(renderer.delay_parameters(), DelayParameters::new(0.25, 0.4, 0.3));
        assert_eq!(renderer.reverb_parameters(), ReverbParameters::new(0.2, 0.1));
        assert_eq!(shared.pending_commands(), 0);

        shared.push(EngineCommand::RemoveVoice(VoiceId(9))).unwrap();
        renderer.render(&mut out);
        assert_eq!(renderer.active_voice_count(), 0);
    }

    #[test]
    fn iterator_ends_after_stop() {
        let (mut renderer, shared) = renderer(&dry_config(), Vec::new());
        assert_eq!(renderer.channels(), 2);
        assert_eq!(renderer.sample_rate(), 44_100);
        assert_eq!(renderer.by_ref().take(1000).count(), 1000);

        shared.stop();
        // drains what was already rendered, then stops
        assert!(renderer.by_ref().take(1000).count() < 128);
        assert!(renderer.next().is_none());
        assert!(!renderer.is_running());
    }

    #[test]
    fn stealing_is_counted() {
        let config = EngineConfig {
            max_voices: 2,
            ..dry_config()
        };
        let settings = VoiceSettings::default();
        let voices = (1..=3)
            .map(|i| Voice::new(VoiceId(i), &settings, 44_100.0))
            .collect();
        let (renderer, shared) = renderer(&config, voices);
        assert_eq!(renderer.active_voice_count(), 2);
        assert_eq!(shared.voices_stolen(), 1);
        assert_eq!(shared.pop_retired(), Some(VoiceId(1)));
        assert_eq!(shared.pop_retired(), None);
    }

    #[test]
    fn finished_voices_are_retired_when_their_slot_is_reused() {
        let config = EngineConfig {
            max_voices: 1,
            ..dry_config()
        };
        let short = VoiceSettings {
            attack: 0.0,
            decay: 0.0,
            sustain: 1.0,
            release: 0.0,
            ..VoiceSettings::default()
        };
        let (mut renderer, shared) =
            renderer(&config, vec![Voice::new(VoiceId(1), &short, 44_100.0)]);
        shared.push(EngineCommand::NoteOff(VoiceId(1))).unwrap();
        let mut out = vec![0.0; 128];
        renderer.render(&mut out);
        assert_eq!(renderer.active_voice_count(), 0);
        assert_eq!(shared.pop_retired(), None);

        shared
            .push(EngineCommand::AddVoice(Voice::new(VoiceId(2), &short, 44_100.0)))
            .unwrap();
        renderer.render(&mut out);
        assert_eq!(shared.pop_retired(), Some(VoiceId(1)));
        assert_eq!(shared.voices_stolen(), 0);
    }

    #[test]
    fn slow_steps_are_counted_as_overruns() {
        // a budget far below what any step can meet
        let config = EngineConfig {
            render_budget_fraction: 1e-6,
            ..dry_config()
        };
        let voice = Voice::new(VoiceId(1), &VoiceSettings::default(), 44_100.0);
        let (mut renderer, shared) = renderer(&config, vec![voice]);
        let mut out = vec![0.0; 128];
        renderer.render(&mut out);
        renderer.render(&mut out);
        assert_eq!(shared.render_overruns(), 2);
        assert!(shared.worst_overrun() > Duration::ZERO);
    }
}
