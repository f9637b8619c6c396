//! Single-threaded coordinator between a device, a tracking context and an
//! output sink
//!
//! Device and context callbacks only post [`Event`]s into the mailbox. All
//! decisions happen on the thread that calls [`Coordinator::run`] (or drives
//! [`Coordinator::iterate`] directly).

use std::path::PathBuf;

use tracing::{debug, info, instrument, warn};

use super::filter::{Admission, FrameFilter};
use super::frame_cache::FrameCache;
use super::mailbox::{self, Mailbox};
use super::state::PipelineState;
use crate::capture::{Device, DeviceEvent, IntProperty, RequestFlags};
use crate::error::{Error, Result};
use crate::output::OutputSink;
use crate::tracking::{Context, ContextEvent};
use crate::{PipelineConfig, RunStats};

/// Notifications funnelled from device and context threads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    DeviceReady,
    /// `frame_no` is the device's `frame` property at notification time
    DeviceFrameReady { frame_no: u32 },
    RequestFrame,
    TrackingReady,
}

/// The frame currently being tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InFlight {
    depth_frame_no: u32,
    video_frame_no: u32,
    timestamp: u64,
}

pub struct Coordinator<D: Device, C: Context, S: OutputSink> {
    device: D,
    context: Option<C>,
    sink: S,
    mailbox: Mailbox<Event>,

    filter: FrameFilter,
    device_config: Option<PathBuf>,
    frame_property: IntProperty,
    device_max: u32,

    cache: FrameCache,
    ready: bool,
    context_wants_frame: bool,
    awaiting_frame: bool,
    in_flight: Option<InFlight>,
    last_frame_no: Option<u32>,
    last_written: Option<u64>,
    finished: bool,
    stats: RunStats,
}

impl<D: Device, C: Context, S: OutputSink> Coordinator<D, C, S> {
    /// Wire the device and context callbacks into a fresh mailbox
    pub fn new(mut device: D, mut context: C, sink: S, settings: &PipelineConfig) -> Result<Self> {
        let (postbox, mailbox) = mailbox::channel();

        let frame_property = device.properties().int("frame")?;
        let device_max = u32::try_from(frame_property.max()).unwrap_or(0);

        let frame = frame_property.clone();
        let device_postbox = postbox.clone();
        device.set_event_callback(Box::new(move |event| match event {
            DeviceEvent::Ready => device_postbox.post(Event::DeviceReady),
            DeviceEvent::FrameReady => device_postbox.post(Event::DeviceFrameReady {
                frame_no: u32::try_from(frame.get()).unwrap_or(0),
            }),
        }));

        context.set_event_callback(Box::new(move |event| match event {
            ContextEvent::RequestFrame => postbox.post(Event::RequestFrame),
            ContextEvent::TrackingReady => postbox.post(Event::TrackingReady),
        }));

        Ok(Self {
            device,
            context: Some(context),
            sink,
            mailbox,
            filter: FrameFilter {
                begin_frame: settings.begin_frame,
                end_frame: settings.end_frame,
                time_step: settings.time_step_ns,
            },
            device_config: settings.device_config.clone(),
            frame_property,
            device_max,
            cache: FrameCache::new(),
            ready: false,
            context_wants_frame: false,
            awaiting_frame: false,
            in_flight: None,
            last_frame_no: None,
            last_written: None,
            finished: false,
            stats: RunStats::default(),
        })
    }

    pub fn state(&self) -> PipelineState {
        if self.finished {
            PipelineState::Done
        } else if self.in_flight.is_some() {
            PipelineState::TrackingInFlight
        } else if self.cache.depth().is_some() {
            PipelineState::FrameCached
        } else if self.awaiting_frame {
            PipelineState::AwaitingDeviceFrame
        } else {
            PipelineState::Idle
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Timestamp of the newest written target
    pub fn last_written_timestamp(&self) -> Option<u64> {
        self.last_written
    }

    /// Timestamp of the frame being tracked, 0 when nothing is in flight
    pub fn last_tracking_timestamp(&self) -> u64 {
        self.in_flight.map_or(0, |f| f.timestamp)
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Commit the device configuration; the device answers with `Ready`
    pub fn start(&mut self) -> Result<()> {
        info!(
            "Tracking frames {}..{} (time step {} ns)",
            self.filter.begin_frame,
            self.filter.end(self.device_max),
            self.filter.time_step
        );
        self.device.commit_config()
    }

    /// Start, process events until the frame window is done, then tear down
    #[instrument(skip_all)]
    pub fn run(mut self) -> Result<RunStats> {
        let result = self.start().and_then(|()| self.event_loop());
        self.teardown();
        result?;

        info!(
            "Finished: {} targets written, {} frames submitted, {} skipped, {} tracking failures",
            self.stats.targets_written,
            self.stats.frames_submitted,
            self.stats.frames_skipped,
            self.stats.tracking_failures
        );
        Ok(self.stats)
    }

    fn event_loop(&mut self) -> Result<()> {
        while !self.finished {
            self.mailbox.wait();
            self.iterate()?;
        }
        Ok(())
    }

    /// Handle everything posted since the previous call
    pub fn iterate(&mut self) -> Result<()> {
        let before = self.state();
        let mut device_ready = 0usize;
        let mut frame_ready: Option<u32> = None;
        let mut tracking_ready = false;

        for event in self.mailbox.drain() {
            match event {
                Event::DeviceReady => device_ready += 1,
                Event::DeviceFrameReady { frame_no } => frame_ready = Some(frame_no),
                Event::RequestFrame => self.context_wants_frame = true,
                Event::TrackingReady => tracking_ready = true,
            }
        }

        for _ in 0..device_ready {
            self.on_device_ready()?;
        }

        if !self.finished {
            self.handle(frame_ready, tracking_ready)?;
        }

        let after = self.state();
        if after != before {
            debug!("Pipeline {} -> {}", before, after);
        }
        Ok(())
    }

    fn handle(&mut self, frame_ready: Option<u32>, tracking_ready: bool) -> Result<()> {
        if let Some(frame_no) = frame_ready {
            self.on_frame_ready(frame_no)?;
        }

        if tracking_ready {
            self.on_tracking_ready()?;
        }

        if self.ready
            && !self.finished
            && self.context_wants_frame
            && self.in_flight.is_none()
            && !self.awaiting_frame
        {
            self.device
                .request_frame(RequestFlags::DEPTH | RequestFlags::VIDEO)?;
            self.awaiting_frame = true;
        }

        Ok(())
    }

    fn context(&self) -> Result<&C> {
        self.context
            .as_ref()
            .ok_or_else(|| Error::Contract("tracking context already released".into()))
    }

    #[instrument(skip_all)]
    fn on_device_ready(&mut self) -> Result<()> {
        if self.ready {
            return Err(Error::Contract("device reported ready twice".into()));
        }
        self.ready = true;

        let (depth_pixels, video_pixels) =
            (self.device.max_depth_pixels(), self.device.max_video_pixels());
        let context = self
            .context
            .as_mut()
            .ok_or_else(|| Error::Contract("tracking context already released".into()))?;
        context.set_max_depth_pixels(depth_pixels);
        context.set_max_video_pixels(video_pixels);

        let properties = self.device.properties();
        properties.set_bool("loop", false)?;
        properties.set_bool("frame_throttle", false)?;
        properties.set_bool("frame_skip", false)?;
        let begin = i32::try_from(self.filter.begin_frame).unwrap_or(i32::MAX);
        self.frame_property.set(begin)?;

        if let Some(path) = &self.device_config {
            if let Err(e) = self.device.load_config(path) {
                warn!("Failed to load device config {}: {}", path.display(), e);
            }
        }

        self.device.start()?;
        context.enable()?;
        info!("Device ready, starting at frame {}", self.filter.begin_frame);
        Ok(())
    }

    fn on_frame_ready(&mut self, frame_no: u32) -> Result<()> {
        self.awaiting_frame = false;

        if let Some(previous) = self.last_frame_no {
            if frame_no < previous {
                warn!("Device went back from frame {} to {}", previous, frame_no);
            }
        }
        self.last_frame_no = Some(frame_no);

        let Some(frame) = self.device.latest_frame() else {
            warn!("Frame {} announced but no frame available", frame_no);
            return Ok(());
        };
        self.cache.update(frame, frame_no);

        if self.context_wants_frame && self.in_flight.is_none() {
            self.submit(frame_no)?;
        }
        Ok(())
    }

    /// Offer the cached pair to the context if it passes admission
    ///
    /// `frame_no` is the frame just announced by the device. The window test
    /// and the completion test on a skip both use it, so the run still ends
    /// when the announcing frame is the video half of a pair.
    fn submit(&mut self, frame_no: u32) -> Result<()> {
        let device = &self.device;
        let Some(paired) = self.cache.pair(|depth, video| device.combine_frames(depth, video))
        else {
            return Ok(());
        };
        let frame = paired.frame.clone();
        let depth_frame_no = paired.frame_no;
        let video_frame_no = self.cache.video_frame_no().unwrap_or(depth_frame_no);

        let elapsed = FrameFilter::elapsed(self.last_written, frame.timestamp());
        let admission = self.filter.admit(frame_no, self.device_max, elapsed);

        if admission != Admission::Admit {
            debug!("Skipping frame {} ({:?})", frame_no, admission);
            self.stats.frames_skipped += 1;
            metrics::counter!("motion_target_frames_skipped").increment(1);
            self.cache.take_depth();
            self.check_complete(frame_no);
            return Ok(());
        }

        let accepted = self.context()?.notify_frame(&frame);
        // Never offer the same depth buffer twice
        self.cache.take_depth();

        if accepted {
            debug!("Submitted frame {} for tracking", depth_frame_no);
            self.in_flight = Some(InFlight {
                depth_frame_no,
                video_frame_no,
                timestamp: frame.timestamp(),
            });
            self.context_wants_frame = false;
            self.stats.frames_submitted += 1;
            metrics::counter!("motion_target_frames_submitted").increment(1);
        } else {
            debug!("Context did not accept frame {}", depth_frame_no);
        }
        Ok(())
    }

    fn on_tracking_ready(&mut self) -> Result<()> {
        let tracking = self.context()?.latest_tracking().ok_or(Error::MissingTracking)?;

        let Some(in_flight) = self.in_flight.take() else {
            warn!("Tracking result at {} with no frame in flight", tracking.timestamp);
            return Ok(());
        };
        let frame_no = in_flight.depth_frame_no;
        if in_flight.video_frame_no != frame_no {
            debug!("Frame {} tracked with video from frame {}", frame_no, in_flight.video_frame_no);
        }

        // Another target may have been written since this frame was admitted
        let elapsed = FrameFilter::elapsed(self.last_written, in_flight.timestamp);
        if elapsed < self.filter.time_step {
            debug!("Discarding tracking for frame {} (time step)", frame_no);
            self.stats.frames_skipped += 1;
            metrics::counter!("motion_target_frames_skipped").increment(1);
        } else if tracking.successful {
            if self.sink.write_target(&tracking, frame_no)? {
                self.last_written = Some(
                    self.last_written
                        .map_or(in_flight.timestamp, |last| last.max(in_flight.timestamp)),
                );
                self.stats.targets_written += 1;
                metrics::counter!("motion_target_targets_written").increment(1);
                info!("Wrote target for frame {}", frame_no);
            } else {
                self.stats.frames_skipped += 1;
                metrics::counter!("motion_target_frames_skipped").increment(1);
            }
        } else {
            info!("Skipping frame {} (tracking failed)", frame_no);
            self.stats.tracking_failures += 1;
            metrics::counter!("motion_target_tracking_failures").increment(1);
        }

        self.check_complete(frame_no);
        Ok(())
    }

    /// Mark the run finished once `frame_no` reaches the end of the window
    pub fn check_complete(&mut self, frame_no: u32) {
        if self.finished {
            return;
        }
        if self.filter.is_complete(frame_no, self.device_max) {
            info!("Reached frame {}, finishing", frame_no);
            self.finished = true;
        }
    }

    fn teardown(&mut self) {
        if let Err(e) = self.device.stop() {
            warn!("Failed to stop device: {}", e);
        }
        let discarded = self.mailbox.discard();
        if discarded > 0 {
            debug!("Discarded {} undelivered events", discarded);
        }
        drop(self.context.take());
        self.cache.clear();
        if let Err(e) = self.device.close() {
            warn!("Failed to close device: {}", e);
        }
    }
}
