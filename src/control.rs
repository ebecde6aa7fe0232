use crate::error::Result;
use crate::oscillator::WaveType;
use crate::voice::{VoiceId, VoiceSettings};

/// Parameter-setting contract between a control surface and the engine.
///
/// Every call validates synchronously and either applies completely or returns an
/// error leaving the engine untouched.
pub trait SynthControl {
    fn add_oscillator(&mut self, settings: VoiceSettings) -> Result<VoiceId>;

    fn set_delay_parameters(&mut self, delay_time: f32, feedback: f32, mix: f32) -> Result<()>;

    fn set_reverb_parameters(&mut self, decay: f32, mix: f32) -> Result<()>;

    /// Moves the voice into its release stage.
    fn note_off(&mut self, voice: VoiceId) -> Result<()>;

    /// Drops the voice without a release tail.
    fn remove_voice(&mut self, voice: VoiceId) -> Result<()>;

    fn release_all(&mut self) -> Result<()>;

    /// Positional form of [`SynthControl::add_oscillator`], in the control form's order.
    #[allow(clippy::too_many_arguments)]
    fn add_oscillator_with(
        &mut self,
        wave_type: WaveType,
        frequency: f32,
        amplitude: f32,
        attack: f32,
        decay: f32,
        sustain: f32,
        release: f32,
    ) -> Result<VoiceId> {
        self.add_oscillator(VoiceSettings::new(
            wave_type, frequency, amplitude, attack, decay, sustain, release,
        ))
    }
}

/// Device lifecycle half of the contract.
pub trait AudioBackend {
    /// Opens the default output device and starts rendering.
    fn initialize_audio_backend(&mut self) -> Result<()>;

    /// Stops rendering and releases the device. Safe to call repeatedly, or without a
    /// prior initialize.
    fn cleanup_audio_backend(&mut self);
}
