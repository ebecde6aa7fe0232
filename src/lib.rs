pub mod command;
pub mod config;
pub mod control;
pub mod delay;
pub mod envelope;
pub mod error;
pub mod mixer;
pub mod oscillator;
pub mod reverb;
pub mod session;
pub mod synth;
pub mod voice;

pub use config::EngineConfig;
pub use control::{AudioBackend, SynthControl};
pub use delay::DelayParameters;
pub use error::{EngineError, Result};
pub use oscillator::WaveType;
pub use reverb::ReverbParameters;
pub use session::EngineSession;
pub use synth::SynthRenderer;
pub use voice::{VoiceId, VoiceSettings};
