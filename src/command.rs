//! Control-thread to render-thread handoff.
//!
//! The control thread pushes [`EngineCommand`]s into a bounded lock-free queue that the
//! render step drains before synthesizing each block. Everything flowing the other way
//! is published through [`SharedState`]: counters and activity as atomics, and the ids of
//! voices the render side dropped to make room through a second bounded queue.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam::queue::ArrayQueue;

use crate::delay::DelayParameters;
use crate::reverb::ReverbParameters;
use crate::voice::{Voice, VoiceId};

/// Messages applied by the render thread, in push order.
#[derive(Debug)]
pub enum EngineCommand {
    /// The voice is fully built on the control thread.
    AddVoice(Voice),
    NoteOff(VoiceId),
    RemoveVoice(VoiceId),
    ReleaseAll,
    SetDelay(DelayParameters),
    SetReverb(ReverbParameters),
}

/// State shared by one session run and its renderer.
pub struct SharedState {
    commands: ArrayQueue<EngineCommand>,
    retired: ArrayQueue<VoiceId>,
    started: Instant,
    last_step_nanos: AtomicU64,
    running: AtomicBool,
    rendering: AtomicBool,
    active_voices: AtomicUsize,
    frames_rendered: AtomicU64,
    render_overruns: AtomicU64,
    worst_overrun_nanos: AtomicU64,
    voices_stolen: AtomicU64,
}

impl SharedState {
    pub fn new(command_capacity: usize, max_voices: usize) -> Self {
        let command_capacity = command_capacity.max(1);
        Self {
            commands: ArrayQueue::new(command_capacity),
            // every queued AddVoice displaces at most one voice, plus a full initial set
            retired: ArrayQueue::new(command_capacity + max_voices.max(1)),
            started: Instant::now(),
            last_step_nanos: AtomicU64::new(0),
            running: AtomicBool::new(true),
            rendering: AtomicBool::new(false),
            active_voices: AtomicUsize::new(0),
            frames_rendered: AtomicU64::new(0),
            render_overruns: AtomicU64::new(0),
            worst_overrun_nanos: AtomicU64::new(0),
            voices_stolen: AtomicU64::new(0),
        }
    }

    /// Hands the command back when the queue is full.
    pub fn push(&self, command: EngineCommand) -> Result<(), EngineCommand> {
        self.commands.push(command)
    }

    pub fn pop(&self) -> Option<EngineCommand> {
        self.commands.pop()
    }

    pub fn pending_commands(&self) -> usize {
        self.commands.len()
    }

    pub fn command_capacity(&self) -> usize {
        self.commands.capacity()
    }

    /// Reports a voice the renderer no longer holds.
    pub fn retire_voice(&self, id: VoiceId) {
        // sized so the control side cannot fall behind by more than it can hold
        let _ = self.retired.push(id);
    }

    pub fn pop_retired(&self) -> Option<VoiceId> {
        self.retired.pop()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Marks the start of a render step. Returns `false` (and leaves the step unmarked)
    /// once [`SharedState::stop`] has been called.
    pub fn begin_render(&self) -> bool {
        self.rendering.store(true, Ordering::SeqCst);
        if self.running.load(Ordering::SeqCst) {
            true
        } else {
            self.rendering.store(false, Ordering::SeqCst);
            false
        }
    }

    pub fn end_render(&self) {
        self.last_step_nanos.store(nanos(self.started.elapsed()), Ordering::Relaxed);
        self.rendering.store(false, Ordering::SeqCst);
    }

    /// Time since the last completed render step, or since creation before the first.
    pub fn since_last_step(&self) -> Duration {
        let last = Duration::from_nanos(self.last_step_nanos.load(Ordering::Relaxed));
        self.started.elapsed().saturating_sub(last)
    }

    /// Stops further render steps and waits for one already in flight to finish.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        while self.rendering.load(Ordering::SeqCst) {
            std::thread::yield_now();
        }
    }

    pub fn publish_active_voices(&self, count: usize) {
        self.active_voices.store(count, Ordering::Relaxed);
    }

    pub fn add_frames_rendered(&self, frames: u64) {
        self.frames_rendered.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn record_overrun(&self, elapsed: Duration) {
        self.render_overruns.fetch_add(1, Ordering::Relaxed);
        self.worst_overrun_nanos.fetch_max(nanos(elapsed), Ordering::Relaxed);
    }

    pub fn record_stolen_voice(&self) {
        self.voices_stolen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active_voices(&self) -> usize {
        self.active_voices.load(Ordering::Relaxed)
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.load(Ordering::Relaxed)
    }

    pub fn render_overruns(&self) -> u64 {
        self.render_overruns.load(Ordering::Relaxed)
    }

    /// Longest render step that missed its deadline.
    pub fn worst_overrun(&self) -> Duration {
        Duration::from_nanos(self.worst_overrun_nanos.load(Ordering::Relaxed))
    }

    pub fn voices_stolen(&self) -> u64 {
        self.voices_stolen.load(Ordering::Relaxed)
    }
}

fn nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
