use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rodio::{OutputStream, OutputStreamHandle};
use tracing::{debug, info, warn};

use crate::command::{EngineCommand, SharedState};
use crate::config::EngineConfig;
use crate::control::{AudioBackend, SynthControl};
use crate::delay::DelayParameters;
use crate::error::{EngineError, Result};
use crate::reverb::ReverbParameters;
use crate::synth::SynthRenderer;
use crate::voice::{Voice, VoiceId, VoiceSettings};

/// Set while some session holds the output device.
static DEVICE_CLAIMED: AtomicBool = AtomicBool::new(false);

struct DeviceOutput {
    // Dropping the stream stops the driver callback thread.
    _stream: OutputStream,
    handle: OutputStreamHandle,
}

impl Drop for DeviceOutput {
    fn drop(&mut self) {
        DEVICE_CLAIMED.store(false, Ordering::SeqCst);
    }
}

/// One engine session: the control-side view of voices and effect parameters, plus
/// the lifecycle of the renderer that turns them into audio.
///
/// Lifecycle: `new` -> `initialize` (or `start_offline`) -> parameter calls ->
/// `cleanup`. Parameter calls made while no renderer is attached only update the
/// session; the next renderer starts from that state. Cleanup discards all voices but
/// keeps the delay and reverb parameters.
///
/// Voices the renderer drops to make room for new ones are removed from the session
/// the next time it is queried. While playing to a device, a renderer that has not
/// been pulled for `device_timeout` is treated as a lost device: the next call fails
/// with `DeviceError` and the session stops, keeping its voices for a later
/// `initialize`.
///
/// Holds the rodio stream while a device is open, so the session stays on the thread
/// that created it.
pub struct EngineSession {
    config: EngineConfig,
    voices: Vec<(VoiceId, VoiceSettings)>,
    next_voice_id: u64,
    delay: DelayParameters,
    reverb: ReverbParameters,
    shared: Option<Arc<SharedState>>,
    output: Option<DeviceOutput>,
    /// Set while something is expected to drive the renderer steadily.
    watchdog: Option<Duration>,
}

impl EngineSession {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            delay: config.delay,
            reverb: config.reverb,
            config,
            voices: Vec::new(),
            next_voice_id: 1,
            shared: None,
            output: None,
            watchdog: None,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Opens the default output device and starts playing.
    ///
    /// A no-op when this session is already playing to a device, unless that device was
    /// lost, in which case it is reopened. Fails with `AlreadyActive` if another session
    /// owns the device or this session is rendering offline.
    pub fn initialize(&mut self) -> Result<()> {
        if let Err(err) = self.check_device() {
            info!(%err, "reopening the audio device");
        }
        if self.output.is_some() {
            debug!("audio backend already initialized");
            return Ok(());
        }
        if self.shared.is_some() {
            return Err(EngineError::AlreadyActive);
        }
        if DEVICE_CLAIMED.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyActive);
        }

        let (stream, handle) = match OutputStream::try_default() {
            Ok(pair) => pair,
            Err(err) => {
                DEVICE_CLAIMED.store(false, Ordering::SeqCst);
                warn!(%err, "no audio output device");
                return Err(err.into());
            }
        };
        let output = DeviceOutput {
            _stream: stream,
            handle,
        };

        let renderer = self.attach_renderer();
        if let Err(err) = output.handle.play_raw(renderer) {
            self.detach_renderer();
            warn!(%err, "failed to start playback");
            // dropping `output` releases the device claim
            return Err(err.into());
        }
        self.output = Some(output);
        self.watchdog = Some(self.config.device_timeout);

        info!(
            sample_rate = self.config.sample_rate,
            channels = self.config.channels,
            block_frames = self.config.block_frames,
            voices = self.voices.len(),
            "audio backend initialized"
        );
        Ok(())
    }

    /// Starts a session without a device and hands back the renderer to pull from.
    pub fn start_offline(&mut self) -> Result<SynthRenderer> {
        if self.shared.is_some() {
            return Err(EngineError::AlreadyActive);
        }
        let renderer = self.attach_renderer();
        info!(voices = self.voices.len(), "offline session started");
        Ok(renderer)
    }

    /// Stops rendering, waits for an in-flight render step, then releases the device
    /// and forgets every voice. Idempotent.
    pub fn cleanup(&mut self) {
        self.voices.clear();
        let Some(shared) = self.detach_renderer() else {
            debug!("cleanup with no active backend");
            return;
        };

        let overruns = shared.render_overruns();
        if overruns > 0 {
            warn!(
                overruns,
                worst = ?shared.worst_overrun(),
                "render steps missed their deadline"
            );
        }
        info!(frames = shared.frames_rendered(), "audio backend cleaned up");
    }

    pub fn is_active(&self) -> bool {
        self.shared.as_ref().is_some_and(|shared| shared.is_running())
    }

    pub fn delay_parameters(&self) -> DelayParameters {
        self.delay
    }

    pub fn reverb_parameters(&self) -> ReverbParameters {
        self.reverb
    }

    /// Voices the session still owns, sounding or not. A voice is gone once it is
    /// removed or the renderer reuses its slot.
    pub fn voice_count(&mut self) -> usize {
        self.sync_voices();
        self.voices.len()
    }

    /// Owned voices in the order they were added.
    pub fn voices(&mut self) -> &[(VoiceId, VoiceSettings)] {
        self.sync_voices();
        &self.voices
    }

    pub fn voice_settings(&mut self, id: VoiceId) -> Option<&VoiceSettings> {
        self.sync_voices();
        self.voices
            .iter()
            .find(|(voice, _)| *voice == id)
            .map(|(_, settings)| settings)
    }

    /// Voices the renderer reported as sounding after its last step.
    pub fn active_voice_count(&self) -> usize {
        self.shared.as_ref().map_or(0, |shared| shared.active_voices())
    }

    pub fn frames_rendered(&self) -> u64 {
        self.shared.as_ref().map_or(0, |shared| shared.frames_rendered())
    }

    pub fn render_overruns(&self) -> u64 {
        self.shared.as_ref().map_or(0, |shared| shared.render_overruns())
    }

    pub fn voices_stolen(&self) -> u64 {
        self.shared.as_ref().map_or(0, |shared| shared.voices_stolen())
    }

    /// `Err(DeviceError)` if the device stopped pulling audio, otherwise
    /// `Err(RenderOverrun)` once any render step of the current run missed its deadline.
    pub fn check_render_health(&mut self) -> Result<()> {
        self.check_device()?;
        let Some(shared) = self.shared.as_ref() else {
            return Ok(());
        };
        match shared.render_overruns() {
            0 => Ok(()),
            count => Err(EngineError::RenderOverrun {
                count,
                budget: self.config.block_period(),
                worst: shared.worst_overrun(),
            }),
        }
    }

    fn attach_renderer(&mut self) -> SynthRenderer {
        let shared = Arc::new(SharedState::new(
            self.config.command_capacity,
            self.config.max_voices,
        ));
        // Only the newest voices fit; the rest would be stolen on the first step anyway.
        let excess = self.voices.len().saturating_sub(self.config.max_voices);
        if excess > 0 {
            for (id, _) in self.voices.drain(..excess) {
                debug!(%id, "voice dropped, no free slot");
                shared.record_stolen_voice();
            }
        }

        let sample_rate = self.config.sample_rate as f32;
        let voices = self
            .voices
            .iter()
            .map(|(id, settings)| Voice::new(*id, settings, sample_rate));
        let renderer = SynthRenderer::new(
            &self.config,
            Arc::clone(&shared),
            self.delay,
            self.reverb,
            voices,
        );
        self.shared = Some(shared);
        renderer
    }

    /// Stops the renderer and releases the device, if any.
    fn detach_renderer(&mut self) -> Option<Arc<SharedState>> {
        self.watchdog = None;
        let shared = self.shared.take()?;
        shared.stop();
        drop(self.output.take());
        forget_retired(&mut self.voices, &shared);
        Some(shared)
    }

    fn sync_voices(&mut self) {
        if let Some(shared) = self.shared.as_ref() {
            forget_retired(&mut self.voices, shared);
        }
    }

    /// Stops the session when the device has not pulled a step within the timeout.
    fn check_device(&mut self) -> Result<()> {
        let (Some(timeout), Some(shared)) = (self.watchdog, self.shared.as_ref()) else {
            return Ok(());
        };
        let stalled = shared.since_last_step();
        if stalled <= timeout {
            return Ok(());
        }

        warn!(?stalled, "audio device stopped pulling samples, stopping the session");
        self.detach_renderer();
        Err(EngineError::DeviceError(format!(
            "no audio rendered for {:?}",
            stalled
        )))
    }

    /// Queues `command` for the renderer when one is attached. Nothing is mutated on
    /// failure.
    fn send(&mut self, command: EngineCommand) -> Result<()> {
        self.check_device()?;
        match &self.shared {
            Some(shared) => shared.push(command).map_err(|_| EngineError::QueueFull),
            None => Ok(()),
        }
    }

    fn require_voice(&mut self, id: VoiceId) -> Result<usize> {
        self.sync_voices();
        self.voices
            .iter()
            .position(|(voice, _)| *voice == id)
            .ok_or(EngineError::UnknownVoice(id))
    }
}

/// Drops voices the renderer no longer holds.
fn forget_retired(voices: &mut Vec<(VoiceId, VoiceSettings)>, shared: &SharedState) {
    while let Some(id) = shared.pop_retired() {
        voices.retain(|(voice, _)| *voice != id);
    }
}

impl SynthControl for EngineSession {
    fn add_oscillator(&mut self, settings: VoiceSettings) -> Result<VoiceId> {
        settings
            .validate()
            .inspect_err(|err| debug!(%err, "add_oscillator rejected"))?;

        let id = VoiceId(self.next_voice_id);
        let voice = Voice::new(id, &settings, self.config.sample_rate as f32);
        self.send(EngineCommand::AddVoice(voice))?;

        self.next_voice_id += 1;
        self.voices.push((id, settings));
        debug!(%id, wave_type = ?settings.wave_type, frequency = settings.frequency, "oscillator added");
        Ok(id)
    }

    fn set_delay_parameters(&mut self, delay_time: f32, feedback: f32, mix: f32) -> Result<()> {
        let params = DelayParameters::new(delay_time, feedback, mix);
        params
            .validate(self.config.max_delay_seconds)
            .inspect_err(|err| debug!(%err, "set_delay_parameters rejected"))?;
        self.send(EngineCommand::SetDelay(params))?;
        self.delay = params;
        Ok(())
    }

    fn set_reverb_parameters(&mut self, decay: f32, mix: f32) -> Result<()> {
        let params = ReverbParameters::new(decay, mix);
        params
            .validate()
            .inspect_err(|err| debug!(%err, "set_reverb_parameters rejected"))?;
        self.send(EngineCommand::SetReverb(params))?;
        self.reverb = params;
        Ok(())
    }

    fn note_off(&mut self, voice: VoiceId) -> Result<()> {
        self.require_voice(voice)?;
        self.send(EngineCommand::NoteOff(voice))
    }

    fn remove_voice(&mut self, voice: VoiceId) -> Result<()> {
        let index = self.require_voice(voice)?;
        self.send(EngineCommand::RemoveVoice(voice))?;
        self.voices.remove(index);
        Ok(())
    }

    fn release_all(&mut self) -> Result<()> {
        self.send(EngineCommand::ReleaseAll)
    }
}

impl AudioBackend for EngineSession {
    fn initialize_audio_backend(&mut self) -> Result<()> {
        self.initialize()
    }

    fn cleanup_audio_backend(&mut self) {
        self.cleanup()
    }
}

impl Drop for EngineSession {
    fn drop(&mut self) {
        self.cleanup();
    }
}
