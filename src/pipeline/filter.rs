//! Frame-window and time-step admission rules

/// Why a candidate frame was or was not submitted for tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    OutsideWindow,
    BelowTimeStep,
}

/// Selects which recording frames get tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFilter {
    pub begin_frame: u32,
    /// Exclusive; the device's last frame index when unset
    pub end_frame: Option<u32>,
    /// Minimum nanoseconds between written targets
    pub time_step: u64,
}

impl FrameFilter {
    /// Time since the last written target; unbounded before the first write
    pub fn elapsed(last_written: Option<u64>, timestamp: u64) -> u64 {
        match last_written {
            Some(last) => timestamp.saturating_sub(last),
            None => u64::MAX,
        }
    }

    pub fn end(&self, device_max: u32) -> u32 {
        self.end_frame.unwrap_or(device_max)
    }

    pub fn admit(&self, frame_no: u32, device_max: u32, elapsed: u64) -> Admission {
        if frame_no < self.begin_frame || frame_no >= self.end(device_max) {
            Admission::OutsideWindow
        } else if elapsed <= self.time_step {
            Admission::BelowTimeStep
        } else {
            Admission::Admit
        }
    }

    /// Whether processing `frame_no` ends the run
    pub fn is_complete(&self, frame_no: u32, device_max: u32) -> bool {
        frame_no >= device_max || self.end_frame.is_some_and(|end| frame_no >= end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: u32 = 9;

    fn filter(begin_frame: u32, end_frame: Option<u32>, time_step: u64) -> FrameFilter {
        FrameFilter {
            begin_frame,
            end_frame,
            time_step,
        }
    }

    #[test]
    fn window_excludes_frames_outside_begin_end() {
        let f = filter(2, Some(8), 0);
        for frame_no in [0, 1, 8, 9] {
            assert_eq!(f.admit(frame_no, MAX, u64::MAX), Admission::OutsideWindow);
        }
        for frame_no in 2..8 {
            assert_eq!(f.admit(frame_no, MAX, u64::MAX), Admission::Admit);
        }
    }

    #[test]
    fn end_defaults_to_device_max() {
        let f = filter(0, None, 0);
        assert_eq!(f.admit(8, MAX, u64::MAX), Admission::Admit);
        assert_eq!(f.admit(9, MAX, u64::MAX), Admission::OutsideWindow);
    }

    #[test]
    fn time_step_requires_strictly_greater_elapsed() {
        let f = filter(0, None, 500);
        let last = Some(1000);

        let rejected = FrameFilter::elapsed(last, 1400);
        assert_eq!(rejected, 400);
        assert_eq!(f.admit(3, MAX, rejected), Admission::BelowTimeStep);
        assert_eq!(f.admit(3, MAX, FrameFilter::elapsed(last, 1500)), Admission::BelowTimeStep);

        let accepted = FrameFilter::elapsed(last, 1600);
        assert_eq!(accepted, 600);
        assert_eq!(f.admit(3, MAX, accepted), Admission::Admit);
    }

    #[test]
    fn first_frame_is_never_below_time_step() {
        let f = filter(0, None, u64::MAX - 1);
        assert_eq!(
            f.admit(0, MAX, FrameFilter::elapsed(None, 0)),
            Admission::Admit
        );
    }

    #[test]
    fn completion_at_end_frame_or_device_max() {
        let f = filter(2, Some(8), 0);
        assert!(!f.is_complete(7, MAX));
        assert!(f.is_complete(8, MAX));

        let open = filter(2, None, 0);
        assert!(!open.is_complete(8, MAX));
        assert!(open.is_complete(9, MAX));
    }
}
