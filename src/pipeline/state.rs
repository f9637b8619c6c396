//! Coordinator state

/// Where the coordinator is in its request/track/write cycle
///
/// Derived from the coordinator's bookkeeping rather than stored, so it can
/// never disagree with the in-flight record or the frame cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Waiting for the device to become ready or for the context to ask
    Idle,

    /// A frame was requested from the device and has not arrived yet
    AwaitingDeviceFrame,

    /// A frame is cached but not yet submitted
    FrameCached,

    /// One frame is being tracked
    TrackingInFlight,

    /// The frame window has been played out
    Done,
}

impl PipelineState {
    pub fn description(&self) -> &'static str {
        match self {
            PipelineState::Idle => "Idle",
            PipelineState::AwaitingDeviceFrame => "AwaitingDeviceFrame",
            PipelineState::FrameCached => "FrameCached",
            PipelineState::TrackingInFlight => "TrackingInFlight",
            PipelineState::Done => "Done",
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_state_names() {
        assert_eq!(PipelineState::TrackingInFlight.to_string(), "TrackingInFlight");
        assert_eq!(
            format!("{} -> {}", PipelineState::Idle, PipelineState::AwaitingDeviceFrame),
            "Idle -> AwaitingDeviceFrame"
        );
    }
}
