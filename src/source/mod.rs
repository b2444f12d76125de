//! Acquisition sources: lazy, effectively infinite streams of raw text lines
//!
//! Each source runs as its own task and feeds the pipeline over a bounded
//! channel, preserving arrival order. The tail variant follows a growing
//! resolver log with persisted read offsets; the capture variant reads the
//! stdout of a supervised packet-capture subprocess.

mod capture;
mod tail;

pub use capture::CaptureSource;
pub use tail::{TailSource, TailState};
