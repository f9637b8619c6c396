//! Depth-centroid stand-in tracker
//!
//! Places a fixed skeleton layout around the centroid of the depth samples
//! within a configurable range. Useful for exercising the pipeline without
//! a trained classifier.

use serde::Deserialize;
use tracing::debug;

use super::{Joint, Skeleton, Tracker};
use crate::capture::{Frame, FrameBuffer, PixelFormat};
use crate::error::{Error, Result};

/// One joint of the skeleton layout, relative to the body centroid in metres
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JointLayout {
    pub name: String,
    pub offset: [f32; 3],
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct CentroidConfig {
    skeleton: Vec<JointLayout>,
    /// Accepted depth range in metres
    depth_range: [f32; 2],
    /// Horizontal field of view of the depth camera in radians
    fov: f32,
}

impl Default for CentroidConfig {
    fn default() -> Self {
        let joint = |name: &str, offset: [f32; 3]| JointLayout {
            name: name.into(),
            offset,
        };
        Self {
            skeleton: vec![
                joint("head.head", [0.0, 0.75, 0.0]),
                joint("head.tail", [0.0, 0.55, 0.0]),
                joint("spine.head", [0.0, 0.55, 0.0]),
                joint("spine.tail", [0.0, 0.0, 0.0]),
                joint("arm_left.head", [-0.2, 0.45, 0.0]),
                joint("arm_left.tail", [-0.55, 0.2, 0.0]),
                joint("arm_right.head", [0.2, 0.45, 0.0]),
                joint("arm_right.tail", [0.55, 0.2, 0.0]),
                joint("leg_left.head", [-0.1, 0.0, 0.0]),
                joint("leg_left.tail", [-0.12, -0.85, 0.0]),
                joint("leg_right.head", [0.1, 0.0, 0.0]),
                joint("leg_right.tail", [0.12, -0.85, 0.0]),
            ],
            depth_range: [0.3, 5.0],
            fov: 1.0,
        }
    }
}

#[derive(Debug, Default)]
pub struct CentroidTracker {
    config: CentroidConfig,
}

impl CentroidTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn samples(buffer: &FrameBuffer) -> Box<dyn Iterator<Item = f32> + '_> {
        match buffer.format {
            PixelFormat::Depth16 => Box::new(
                buffer
                    .data
                    .chunks_exact(2)
                    .map(|b| u16::from_le_bytes([b[0], b[1]]) as f32 / 1000.0),
            ),
            PixelFormat::DepthF32 => Box::new(
                buffer
                    .data
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            ),
            _ => Box::new(std::iter::empty()),
        }
    }

    /// Centroid of in-range samples as a camera-space point
    fn centroid(&self, buffer: &FrameBuffer) -> Option<[f32; 3]> {
        let [near, far] = self.config.depth_range;
        let width = buffer.width.max(1) as usize;

        let (mut sx, mut sy, mut sz, mut n) = (0f64, 0f64, 0f64, 0usize);
        for (i, z) in Self::samples(buffer).enumerate() {
            if !(near..=far).contains(&z) {
                continue;
            }
            sx += (i % width) as f64;
            sy += (i / width) as f64;
            sz += z as f64;
            n += 1;
        }
        if n == 0 {
            return None;
        }

        let n = n as f64;
        let (cx, cy, z) = ((sx / n) as f32, (sy / n) as f32, (sz / n) as f32);
        let half_w = buffer.width as f32 / 2.0;
        let half_h = buffer.height as f32 / 2.0;
        let focal = half_w / (self.config.fov / 2.0).tan();

        Some([(cx - half_w) * z / focal, (half_h - cy) * z / focal, z])
    }
}

impl Tracker for CentroidTracker {
    fn configure(&mut self, config: &serde_json::Value) -> Result<()> {
        let Some(section) = config.get("tracker") else {
            return Ok(());
        };
        self.config = CentroidConfig::deserialize(section)
            .map_err(|e| Error::json("tracker configuration", e))?;
        debug!("Tracker configured with {} joints", self.config.skeleton.len());
        Ok(())
    }

    fn track(&mut self, frame: &Frame) -> Option<Skeleton> {
        let [x, y, z] = self.centroid(frame.depth()?)?;
        let joints = self
            .config
            .skeleton
            .iter()
            .map(|layout| {
                let [dx, dy, dz] = layout.offset;
                Some(Joint::new(layout.name.clone(), [x + dx, y + dy, z + dz]))
            })
            .collect();
        Some(Skeleton { joints })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FrameMetadata;
    use bytes::Bytes;
    use serde_json::json;

    fn depth_frame(samples_mm: &[u16], width: u32) -> Frame {
        let data: Vec<u8> = samples_mm.iter().flat_map(|s| s.to_le_bytes()).collect();
        let height = samples_mm.len() as u32 / width;
        Frame::new(
            FrameMetadata {
                sequence: 0,
                timestamp: 0,
            },
            Some(FrameBuffer::new(Bytes::from(data), width, height, PixelFormat::Depth16)),
            None,
        )
    }

    #[test]
    fn empty_depth_fails_to_track() {
        let mut tracker = CentroidTracker::new();
        assert!(tracker.track(&depth_frame(&[0, 0, 0, 0], 2)).is_none());
    }

    #[test]
    fn centred_subject_lands_on_optical_axis() {
        let mut tracker = CentroidTracker::new();
        tracker
            .configure(&json!({"tracker": {
                "skeleton": [{"name": "spine.tail", "offset": [0.0, 0.0, 0.0]}]
            }}))
            .unwrap();

        // 4x4 image, subject at 2m covering the centre 2x2 block
        #[rustfmt::skip]
        let samples = [
            0,    0,    0, 0,
            0, 2000, 2000, 0,
            0, 2000, 2000, 0,
            0,    0,    0, 0,
        ];
        let skeleton = tracker.track(&depth_frame(&samples, 4)).unwrap();
        let joint = skeleton.joints[0].as_ref().unwrap();
        assert_eq!(joint.name.as_deref(), Some("spine.tail"));

        let [x, y, z] = joint.position;
        // Pixel centres sit half a pixel off the image centre
        assert!(x.abs() < 0.5 && y.abs() < 0.5);
        assert!((z - 2.0).abs() < 1e-6);
    }

    #[test]
    fn default_layout_names_every_joint() {
        let mut tracker = CentroidTracker::new();
        let skeleton = tracker.track(&depth_frame(&[1000; 4], 2)).unwrap();
        assert_eq!(skeleton.joints.len(), 12);
        assert!(skeleton
            .joints
            .iter()
            .all(|j| j.as_ref().and_then(|j| j.name.as_deref()).is_some()));
    }

    #[test]
    fn malformed_tracker_section_is_an_error() {
        let mut tracker = CentroidTracker::new();
        assert!(tracker
            .configure(&json!({"tracker": {"skeleton": "nope"}}))
            .is_err());
    }
}
