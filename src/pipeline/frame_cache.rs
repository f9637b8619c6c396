//! Latest depth and video buffers seen by the coordinator

use crate::capture::Frame;

/// A cached frame and the recording frame that produced it
#[derive(Debug, Clone)]
pub struct CachedFrame {
    pub frame: Frame,
    pub frame_no: u32,
}

/// Holds the newest depth-role and video-role frames until they can be
/// submitted together
#[derive(Debug, Default)]
pub struct FrameCache {
    depth: Option<CachedFrame>,
    video: Option<CachedFrame>,
}

impl FrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace whichever roles `frame` carries, dropping the previous
    /// holders. Returns `(depth_updated, video_updated)`.
    pub fn update(&mut self, frame: Frame, frame_no: u32) -> (bool, bool) {
        let (has_depth, has_video) = (frame.has_depth(), frame.has_video());

        if has_video {
            self.video = Some(CachedFrame {
                frame: frame.clone(),
                frame_no,
            });
        }
        if has_depth {
            self.depth = Some(CachedFrame { frame, frame_no });
        }

        (has_depth, has_video)
    }

    /// Once both roles are filled, make them one frame and return it
    ///
    /// `combine` runs only when the roles are held by distinct frames;
    /// afterwards both roles share the combined frame.
    pub fn pair(&mut self, combine: impl FnOnce(Frame, Frame) -> Frame) -> Option<&CachedFrame> {
        let (Some(depth), Some(video)) = (self.depth.as_ref(), self.video.as_ref()) else {
            return None;
        };

        if !Frame::ptr_eq(&depth.frame, &video.frame) {
            let (Some(depth), Some(video)) = (self.depth.take(), self.video.take()) else {
                unreachable!("both roles checked above");
            };
            let full = combine(depth.frame, video.frame);
            self.video = Some(CachedFrame {
                frame: full.clone(),
                frame_no: video.frame_no,
            });
            self.depth = Some(CachedFrame {
                frame: full,
                frame_no: depth.frame_no,
            });
        }

        self.depth.as_ref()
    }

    pub fn depth(&self) -> Option<&CachedFrame> {
        self.depth.as_ref()
    }

    pub fn depth_frame_no(&self) -> Option<u32> {
        self.depth.as_ref().map(|c| c.frame_no)
    }

    pub fn video_frame_no(&self) -> Option<u32> {
        self.video.as_ref().map(|c| c.frame_no)
    }

    /// Release the depth holder
    pub fn take_depth(&mut self) -> Option<CachedFrame> {
        self.depth.take()
    }

    pub fn clear(&mut self) {
        self.depth = None;
        self.video = None;
    }
}
