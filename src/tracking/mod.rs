pub mod centroid;
pub mod context;

use std::sync::Arc;

pub use centroid::CentroidTracker;
pub use context::TrackingContext;

use crate::capture::Frame;
use crate::error::Result;

/// Notifications a tracking context delivers from its own threads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextEvent {
    /// The context is ready for another frame
    RequestFrame,
    /// A result can be fetched with [`Context::latest_tracking`]
    TrackingReady,
}

/// Invoked on an arbitrary context thread, possibly with context locks held
pub type ContextEventCallback = Box<dyn Fn(ContextEvent) + Send + Sync>;

/// A tracked joint; `name` is `bone.part` for joints that belong to a bone
#[derive(Debug, Clone, PartialEq)]
pub struct Joint {
    pub name: Option<String>,
    pub position: [f32; 3],
}

impl Joint {
    pub fn new(name: impl Into<String>, position: [f32; 3]) -> Self {
        Self {
            name: Some(name.into()),
            position,
        }
    }
}

/// Joints in tracker order; `None` where a joint could not be inferred
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Skeleton {
    pub joints: Vec<Option<Joint>>,
}

/// Outcome of tracking one submitted frame
#[derive(Debug, Clone)]
pub struct TrackingResult {
    /// Timestamp of the tracked frame
    pub timestamp: u64,
    pub successful: bool,
    pub skeleton: Skeleton,
}

impl TrackingResult {
    pub fn success(timestamp: u64, skeleton: Skeleton) -> Self {
        Self {
            timestamp,
            successful: true,
            skeleton,
        }
    }

    pub fn failure(timestamp: u64) -> Self {
        Self {
            timestamp,
            successful: false,
            skeleton: Skeleton::default(),
        }
    }
}

/// A tracking engine consuming frames and producing skeletons
pub trait Context {
    fn set_event_callback(&mut self, callback: ContextEventCallback);

    fn set_config(&mut self, config: &serde_json::Value) -> Result<()>;

    fn set_max_depth_pixels(&mut self, pixels: usize);

    fn set_max_video_pixels(&mut self, pixels: usize);

    /// Start asking for frames
    fn enable(&mut self) -> Result<()>;

    /// Offer a frame for tracking; false if it was not accepted
    fn notify_frame(&self, frame: &Frame) -> bool;

    fn latest_tracking(&self) -> Option<Arc<TrackingResult>>;
}

/// The skeleton-fitting step run by [`TrackingContext`]
pub trait Tracker: Send {
    fn configure(&mut self, config: &serde_json::Value) -> Result<()>;

    /// `None` when nothing could be tracked in this frame
    fn track(&mut self, frame: &Frame) -> Option<Skeleton>;
}
