//! Worker-thread tracking context

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use arc_swap::ArcSwapOption;
use flume::{Receiver, Sender};
use tracing::{debug, error, warn};

use super::{Context, ContextEvent, ContextEventCallback, Tracker, TrackingResult};
use crate::capture::Frame;
use crate::error::{Error, Result};

enum Command {
    Enable,
    Track(Frame),
    Shutdown,
}

struct Shared {
    callback: Mutex<Option<ContextEventCallback>>,
    tracker: Mutex<Box<dyn Tracker>>,
    latest: ArcSwapOption<TrackingResult>,
    enabled: AtomicBool,
    busy: AtomicBool,
    max_depth_pixels: AtomicUsize,
    max_video_pixels: AtomicUsize,
}

impl Shared {
    fn notify(&self, event: ContextEvent) {
        let callback = self.callback.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(callback) = callback.as_ref() {
            callback(event);
        }
    }

    fn tracker(&self) -> MutexGuard<'_, Box<dyn Tracker>> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Runs a [`Tracker`] on a dedicated thread, one frame at a time
///
/// After each tracked frame the context stores the result, announces
/// `TrackingReady`, then asks for the next frame.
pub struct TrackingContext {
    shared: Arc<Shared>,
    commands: Sender<Command>,
    worker: Option<JoinHandle<()>>,
}

impl TrackingContext {
    pub fn new(tracker: Box<dyn Tracker>) -> Result<Self> {
        let shared = Arc::new(Shared {
            callback: Mutex::new(None),
            tracker: Mutex::new(tracker),
            latest: ArcSwapOption::empty(),
            enabled: AtomicBool::new(false),
            busy: AtomicBool::new(false),
            max_depth_pixels: AtomicUsize::new(0),
            max_video_pixels: AtomicUsize::new(0),
        });

        let (commands, rx) = flume::unbounded();
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("tracking".into())
            .spawn(move || track_loop(worker_shared, rx))
            .map_err(|source| Error::Spawn {
                name: "tracking",
                source,
            })?;

        Ok(Self {
            shared,
            commands,
            worker: Some(worker),
        })
    }

    fn exceeds(limit: &AtomicUsize, pixels: usize) -> bool {
        let limit = limit.load(Ordering::Acquire);
        limit != 0 && pixels > limit
    }
}

impl Context for TrackingContext {
    fn set_event_callback(&mut self, callback: ContextEventCallback) {
        *self
            .shared
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    fn set_config(&mut self, config: &serde_json::Value) -> Result<()> {
        self.shared.tracker().configure(config)
    }

    fn set_max_depth_pixels(&mut self, pixels: usize) {
        self.shared.max_depth_pixels.store(pixels, Ordering::Release);
    }

    fn set_max_video_pixels(&mut self, pixels: usize) {
        self.shared.max_video_pixels.store(pixels, Ordering::Release);
    }

    fn enable(&mut self) -> Result<()> {
        if self.shared.enabled.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.commands
            .send(Command::Enable)
            .map_err(|_| Error::Disconnected("tracking context"))
    }

    fn notify_frame(&self, frame: &Frame) -> bool {
        if !self.shared.enabled.load(Ordering::Acquire) {
            warn!("Frame offered to a disabled tracking context");
            return false;
        }

        let Some(depth) = frame.depth() else {
            warn!("Refusing frame {} without a depth buffer", frame.sequence());
            return false;
        };
        if Self::exceeds(&self.shared.max_depth_pixels, depth.pixels()) {
            warn!("Refusing frame {}: depth buffer too large", frame.sequence());
            return false;
        }
        if let Some(video) = frame.video() {
            if Self::exceeds(&self.shared.max_video_pixels, video.pixels()) {
                warn!("Refusing frame {}: video buffer too large", frame.sequence());
                return false;
            }
        }

        if self.shared.busy.swap(true, Ordering::AcqRel) {
            debug!("Tracking busy, frame {} not accepted", frame.sequence());
            return false;
        }

        if self.commands.send(Command::Track(frame.clone())).is_err() {
            self.shared.busy.store(false, Ordering::Release);
            return false;
        }
        true
    }

    fn latest_tracking(&self) -> Option<Arc<TrackingResult>> {
        self.shared.latest.load_full()
    }
}

impl Drop for TrackingContext {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.commands.send(Command::Shutdown);
            if worker.join().is_err() {
                error!("Tracking worker panicked");
            }
        }
    }
}

fn track_loop(shared: Arc<Shared>, commands: Receiver<Command>) {
    while let Ok(command) = commands.recv() {
        match command {
            Command::Enable => shared.notify(ContextEvent::RequestFrame),
            Command::Track(frame) => {
                let timestamp = frame.timestamp();
                let result = match shared.tracker().track(&frame) {
                    Some(skeleton) => TrackingResult::success(timestamp, skeleton),
                    None => TrackingResult::failure(timestamp),
                };
                drop(frame);

                shared.latest.store(Some(Arc::new(result)));
                shared.busy.store(false, Ordering::Release);
                shared.notify(ContextEvent::TrackingReady);
                shared.notify(ContextEvent::RequestFrame);
            }
            Command::Shutdown => break,
        }
    }
    debug!("Tracking worker exiting");
}
