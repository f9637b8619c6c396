pub mod target;

pub use target::TargetWriter;

use crate::error::Result;
use crate::tracking::TrackingResult;

/// Consumer of successfully tracked frames
pub trait OutputSink {
    /// Emit a target for `frame_no`. Returns false when the frame was
    /// skipped because the skeleton was incomplete.
    fn write_target(&mut self, tracking: &TrackingResult, frame_no: u32) -> Result<bool>;
}
