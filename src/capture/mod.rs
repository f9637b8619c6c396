pub mod frame;
pub mod properties;
pub mod recording;

use std::ops::BitOr;
use std::path::Path;

pub use frame::{Frame, FrameBuffer, FrameMetadata, PixelFormat};
pub use properties::{IntProperty, Properties};
pub use recording::{RecordingDevice, RecordingWriter};

use crate::error::Result;

/// Notifications a device delivers from its own threads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Configuration committed; the device may now be configured and started
    Ready,
    /// A new frame can be fetched with [`Device::latest_frame`]
    FrameReady,
}

/// Invoked on an arbitrary device thread, possibly with device locks held
pub type DeviceEventCallback = Box<dyn Fn(DeviceEvent) + Send + Sync>;

/// Buffers wanted from the next frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestFlags(u8);

impl RequestFlags {
    pub const DEPTH: RequestFlags = RequestFlags(1);
    pub const VIDEO: RequestFlags = RequestFlags(1 << 1);

    pub fn contains(self, other: RequestFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for RequestFlags {
    type Output = RequestFlags;

    fn bitor(self, rhs: RequestFlags) -> RequestFlags {
        RequestFlags(self.0 | rhs.0)
    }
}

/// A source of depth/video frames
pub trait Device {
    fn set_event_callback(&mut self, callback: DeviceEventCallback);

    /// Finish configuration; [`DeviceEvent::Ready`] follows asynchronously
    fn commit_config(&mut self) -> Result<()>;

    /// Apply a JSON device configuration file
    fn load_config(&mut self, path: &Path) -> Result<()>;

    fn start(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    /// Shut down device threads; no events are delivered afterwards
    fn close(&mut self) -> Result<()>;

    /// Newest delivered frame, as a new handle
    fn latest_frame(&self) -> Option<Frame>;

    fn request_frame(&self, flags: RequestFlags) -> Result<()>;

    /// Merge the depth plane (and metadata) of one frame with the video
    /// plane of another
    fn combine_frames(&self, depth: Frame, video: Frame) -> Frame {
        Frame::combine(depth, video)
    }

    fn properties(&self) -> &Properties;

    fn max_depth_pixels(&self) -> usize;

    fn max_video_pixels(&self) -> usize;
}
