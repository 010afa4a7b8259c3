//! Event stream decoding
//!
//! bytes → `FrameDecoder` → `classify` → `StreamEvent`

pub mod decoder;
pub mod event;

pub use decoder::{DATA_PREFIX, DONE_SENTINEL, Frame, FrameDecoder, decode_frames};
pub use event::{StreamEvent, classify};
