//! Audio channel, device engine, and sound cues
//!
//! [`AudioChannel`] arbitrates the single input/output device pair between
//! consumers; [`AudioEngine`] drives the physical cpal streams behind it.
//! The two are separate so tests can feed the arbiter synthetic frames
//! through the same interface the engine uses.

mod channel;
mod cues;
mod device;
mod frame;

pub use channel::{AudioChannel, Consumer, InputHandle, OutputHandle};
pub use cues::{Cue, SoundBank};
pub use device::AudioEngine;
pub use frame::{AudioFrame, bytes_to_pcm16, pcm16_to_bytes, samples_to_wav};
