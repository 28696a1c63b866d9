//! Capture layer for the proctoring monitor.
//!
//! Owns the per-source lifecycle ([`source`]), frame sampling and
//! compositing ([`compositor`]), and a file-backed capture backend
//! ([`still`]).

pub mod compositor;
pub mod source;
pub mod still;

pub use compositor::FrameCompositor;
pub use source::{CaptureBackend, CaptureRequest, EndSignal, MediaStream, SourceEvent, SourceHandle};
pub use still::StillImageBackend;
