use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Shared handle to a depth and/or video buffer
///
/// Clones are cheap and share storage; the buffers go back to their pool
/// once the last handle drops.
#[derive(Clone)]
pub struct Frame {
    inner: Arc<FrameInner>,
}

struct FrameInner {
    meta: FrameMetadata,
    depth: Option<FrameBuffer>,
    video: Option<FrameBuffer>,
}

/// Frame metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    pub sequence: u64,
    /// Capture timestamp in nanoseconds
    pub timestamp: u64,
}

/// Immutable image plane - can be shared across threads without copying
#[derive(Clone)]
pub struct FrameBuffer {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// Little-endian u16 millimetres
    Depth16,
    /// Little-endian f32 metres
    DepthF32,
    Rgb24,
    Bgr24,
    Yuyv4,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Depth16 | PixelFormat::Yuyv4 => 2,
            PixelFormat::DepthF32 => 4,
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => 3,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(self, PixelFormat::Depth16 | PixelFormat::DepthF32)
    }
}

impl FrameBuffer {
    pub fn new(data: Bytes, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            data,
            width,
            height,
            format,
        }
    }

    pub fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("len", &self.data.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .finish()
    }
}

impl Frame {
    pub fn new(meta: FrameMetadata, depth: Option<FrameBuffer>, video: Option<FrameBuffer>) -> Self {
        Self {
            inner: Arc::new(FrameInner { meta, depth, video }),
        }
    }

    /// Build one frame from the depth plane and metadata of `depth` and the
    /// video plane of `video`, consuming both handles
    pub fn combine(depth: Frame, video: Frame) -> Frame {
        Frame::new(
            depth.inner.meta,
            depth.inner.depth.clone(),
            video.inner.video.clone(),
        )
    }

    pub fn meta(&self) -> &FrameMetadata {
        &self.inner.meta
    }

    pub fn timestamp(&self) -> u64 {
        self.inner.meta.timestamp
    }

    pub fn sequence(&self) -> u64 {
        self.inner.meta.sequence
    }

    pub fn depth(&self) -> Option<&FrameBuffer> {
        self.inner.depth.as_ref()
    }

    pub fn video(&self) -> Option<&FrameBuffer> {
        self.inner.video.as_ref()
    }

    pub fn has_depth(&self) -> bool {
        self.inner.depth.is_some()
    }

    pub fn has_video(&self) -> bool {
        self.inner.video.is_some()
    }

    /// Whether both handles refer to the same frame object
    pub fn ptr_eq(a: &Frame, b: &Frame) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Number of live handles to this frame
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("meta", &self.inner.meta)
            .field("depth", &self.inner.depth)
            .field("video", &self.inner.video)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane(format: PixelFormat, fill: u8) -> FrameBuffer {
        FrameBuffer::new(Bytes::from(vec![fill; 8]), 2, 2, format)
    }

    fn frame(sequence: u64, timestamp: u64, depth: bool, video: bool) -> Frame {
        Frame::new(
            FrameMetadata {
                sequence,
                timestamp,
            },
            depth.then(|| plane(PixelFormat::Depth16, 1)),
            video.then(|| plane(PixelFormat::Rgb24, 2)),
        )
    }

    #[test]
    fn combine_takes_depth_metadata_and_video_plane() {
        let depth = frame(1, 100, true, false);
        let video = frame(2, 105, false, true);

        let full = Frame::combine(depth, video);
        assert_eq!(full.timestamp(), 100);
        assert_eq!(full.sequence(), 1);
        assert_eq!(full.depth().unwrap().data[0], 1);
        assert_eq!(full.video().unwrap().data[0], 2);
        assert_eq!(full.holders(), 1);
    }

    #[test]
    fn combine_releases_input_handles() {
        let depth = frame(1, 100, true, false);
        let keep = depth.clone();
        assert_eq!(keep.holders(), 2);

        let _full = Frame::combine(depth, frame(2, 105, false, true));
        assert_eq!(keep.holders(), 1);
    }

    #[test]
    fn ptr_eq_tracks_identity_not_contents() {
        let a = frame(1, 100, true, true);
        let b = a.clone();
        let c = frame(1, 100, true, true);
        assert!(Frame::ptr_eq(&a, &b));
        assert!(!Frame::ptr_eq(&a, &c));
    }
}
