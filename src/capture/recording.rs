//! Recording replay device
//!
//! A recording is a directory holding a `recording.json` manifest plus one
//! raw buffer file per recorded depth or video plane. Frames are read on a
//! dedicated IO thread into pooled buffers and announced through the event
//! callback.
//!
//! Each plane role needs at least [`crate::MIN_BUFFER_POOL_SIZE`] buffers:
//! the previously published frame stays referenced by the latest-frame slot
//! and the consumer's cache while the next one is read.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use flume::{Receiver, Sender, TryRecvError};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use super::{
    Device, DeviceEvent, DeviceEventCallback, Frame, FrameBuffer, FrameMetadata, IntProperty,
    PixelFormat, Properties, RequestFlags,
};
use crate::error::{Error, Result};
use crate::pipeline::BufferPool;
use crate::RecordingConfig;

pub const MANIFEST_NAME: &str = "recording.json";

/// Longest single sleep when pacing playback to capture time
const MAX_PACING_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl StreamInfo {
    pub fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn frame_bytes(&self) -> usize {
        self.pixels() * self.format.bytes_per_pixel()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedFrame {
    /// Capture timestamp in nanoseconds
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingManifest {
    pub depth: StreamInfo,
    pub video: StreamInfo,
    pub frames: Vec<RecordedFrame>,
}

impl RecordingManifest {
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(MANIFEST_NAME);
        let text = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        let manifest: RecordingManifest =
            serde_json::from_str(&text).map_err(|e| Error::json(path.display().to_string(), e))?;

        if manifest.frames.is_empty() {
            return Err(Error::Recording {
                path: root.into(),
                reason: "recording has no frames".into(),
            });
        }
        if i32::try_from(manifest.frames.len()).is_err() {
            return Err(Error::Recording {
                path: root.into(),
                reason: format!("too many frames ({})", manifest.frames.len()),
            });
        }
        if !manifest.depth.format.is_depth() {
            return Err(Error::Recording {
                path: root.into(),
                reason: format!("{:?} is not a depth format", manifest.depth.format),
            });
        }
        Ok(manifest)
    }
}

enum Command {
    CommitConfig,
    Start,
    Stop,
    Request(RequestFlags),
    Shutdown,
}

struct Shared {
    root: PathBuf,
    manifest: RecordingManifest,
    lockstep_io: bool,
    latest: ArcSwapOption<Frame>,
    callback: Mutex<Option<DeviceEventCallback>>,
    depth_pool: Arc<BufferPool<Vec<u8>>>,
    video_pool: Arc<BufferPool<Vec<u8>>>,
    frame: IntProperty,
    looping: Arc<AtomicBool>,
    throttle: Arc<AtomicBool>,
    skip: Arc<AtomicBool>,
    sequence: AtomicU64,
}

/// Replays a recording directory
pub struct RecordingDevice {
    shared: Arc<Shared>,
    properties: Properties,
    commands: Sender<Command>,
    worker: Option<JoinHandle<()>>,
}

impl RecordingDevice {
    /// Open a recording and spawn its IO thread
    #[instrument(skip(config), fields(path = %config.path.display()))]
    pub fn open(config: &RecordingConfig) -> Result<Self> {
        config.validate()?;
        let manifest = RecordingManifest::load(&config.path)?;
        info!(
            "Opened recording with {} frames (depth {}x{}, video {}x{})",
            manifest.frames.len(),
            manifest.depth.width,
            manifest.depth.height,
            manifest.video.width,
            manifest.video.height
        );

        let max_frame = manifest.frames.len() as i32 - 1;
        let mut properties = Properties::new();
        let frame = properties.add_int("frame", 0, 0, max_frame);
        let looping = properties.add_bool("loop", true);
        let throttle = properties.add_bool("frame_throttle", true);
        let skip = properties.add_bool("frame_skip", true);
        properties.add_string("path", config.path.display().to_string());

        let shared = Arc::new(Shared {
            root: config.path.clone(),
            depth_pool: Arc::new(buffer_pool("depth", config.buffer_pool_size, manifest.depth)),
            video_pool: Arc::new(buffer_pool("video", config.buffer_pool_size, manifest.video)),
            manifest,
            lockstep_io: config.lockstep_io,
            latest: ArcSwapOption::empty(),
            callback: Mutex::new(None),
            frame,
            looping,
            throttle,
            skip,
            sequence: AtomicU64::new(0),
        });

        let (commands, rx) = flume::unbounded();
        let io_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("recording-io".into())
            .spawn(move || io_loop(io_shared, rx))
            .map_err(|source| Error::Spawn {
                name: "recording-io",
                source,
            })?;

        Ok(Self {
            shared,
            properties,
            commands,
            worker: Some(worker),
        })
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::Disconnected("recording device"))
    }
}

fn buffer_pool(role: &str, max_size: usize, info: StreamInfo) -> BufferPool<Vec<u8>> {
    let capacity = info.frame_bytes();
    BufferPool::new(
        format!("{role} buffers"),
        max_size,
        move || Vec::with_capacity(capacity),
        |_buf| {},
    )
}

impl Device for RecordingDevice {
    fn set_event_callback(&mut self, callback: DeviceEventCallback) {
        *self
            .shared
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    fn commit_config(&mut self) -> Result<()> {
        self.send(Command::CommitConfig)
    }

    fn load_config(&mut self, path: &Path) -> Result<()> {
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let config: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| Error::json(path.display().to_string(), e))?;
        match config.get("properties") {
            Some(values) => self.properties.apply_json(values),
            None => Ok(()),
        }
    }

    fn start(&mut self) -> Result<()> {
        self.send(Command::Start)
    }

    fn stop(&mut self) -> Result<()> {
        self.send(Command::Stop)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(worker) = self.worker.take() {
            // The IO thread may already be gone, joining is what matters.
            let _ = self.commands.send(Command::Shutdown);
            if worker.join().is_err() {
                error!("Recording IO thread panicked");
            }
        }
        self.shared.latest.store(None);
        Ok(())
    }

    fn latest_frame(&self) -> Option<Frame> {
        self.shared.latest.load_full().map(|frame| (*frame).clone())
    }

    fn request_frame(&self, flags: RequestFlags) -> Result<()> {
        self.send(Command::Request(flags))
    }

    fn properties(&self) -> &Properties {
        &self.properties
    }

    fn max_depth_pixels(&self) -> usize {
        self.shared.manifest.depth.pixels()
    }

    fn max_video_pixels(&self) -> usize {
        self.shared.manifest.video.pixels()
    }
}

impl Drop for RecordingDevice {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Maps recording time onto wall-clock time for throttled playback
#[derive(Default)]
struct Pacer {
    origin: Option<(Instant, u64)>,
}

impl Pacer {
    fn reset(&mut self) {
        self.origin = None;
    }

    fn due(&mut self, timestamp: u64) -> Instant {
        let (start, first) = *self.origin.get_or_insert((Instant::now(), timestamp));
        start + Duration::from_nanos(timestamp.saturating_sub(first))
    }

    fn is_late(&mut self, timestamp: u64) -> bool {
        Instant::now() >= self.due(timestamp)
    }

    fn wait_for(&mut self, timestamp: u64) {
        let delay = self.due(timestamp).saturating_duration_since(Instant::now());
        thread::sleep(delay.min(MAX_PACING_DELAY));
    }
}

fn io_loop(shared: Arc<Shared>, commands: Receiver<Command>) {
    debug!("Recording IO thread started");

    let mut running = false;
    let mut exhausted = false;
    let mut pending: Option<RequestFlags> = None;
    let mut pacer = Pacer::default();

    loop {
        let streaming = running && !shared.lockstep_io && !exhausted;
        let command = if streaming {
            match commands.try_recv() {
                Ok(command) => Some(command),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => break,
            }
        } else {
            match commands.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            }
        };

        match command {
            Some(Command::CommitConfig) => shared.notify(DeviceEvent::Ready),
            Some(Command::Start) => {
                running = true;
                exhausted = false;
                pacer.reset();
            }
            Some(Command::Stop) => running = false,
            Some(Command::Request(flags)) => {
                pending = Some(pending.map_or(flags, |p| p | flags));
            }
            Some(Command::Shutdown) => break,
            None => {}
        }

        if !running {
            continue;
        }

        if shared.lockstep_io {
            // Exactly one recording frame per request
            if let Some(flags) = pending.take() {
                shared.deliver(flags, &mut pacer, false);
            }
        } else if !exhausted {
            let flags = pending.take().unwrap_or(RequestFlags::DEPTH | RequestFlags::VIDEO);
            exhausted = !shared.deliver(flags, &mut pacer, true);
        }
    }

    shared.latest.store(None);
    debug!("Recording IO thread exiting");
}

impl Shared {
    fn notify(&self, event: DeviceEvent) {
        let callback = self.callback.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(callback) = callback.as_ref() {
            callback(event);
        }
    }

    /// Read the frame at the `frame` property, publish it, then advance.
    /// Returns false once a non-looping recording has been played out.
    fn deliver(&self, flags: RequestFlags, pacer: &mut Pacer, streaming: bool) -> bool {
        let max = self.frame.max();
        let mut index = self.frame.get();

        if self.throttle.load(Ordering::Acquire) {
            if streaming && self.skip.load(Ordering::Acquire) {
                while index < max && pacer.is_late(self.record(index + 1).timestamp) {
                    index += 1;
                }
            }
            pacer.wait_for(self.record(index).timestamp);
        }

        let record = self.record(index);
        let depth = flags
            .contains(RequestFlags::DEPTH)
            .then_some(record.depth.as_deref())
            .flatten()
            .and_then(|rel| self.load(rel, &self.depth_pool, self.manifest.depth, index));
        let video = flags
            .contains(RequestFlags::VIDEO)
            .then_some(record.video.as_deref())
            .flatten()
            .and_then(|rel| self.load(rel, &self.video_pool, self.manifest.video, index));

        if depth.is_none() && video.is_none() {
            debug!("Recording frame {} has none of the requested buffers", index);
        }

        let frame = Frame::new(
            FrameMetadata {
                sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
                timestamp: record.timestamp,
            },
            depth,
            video,
        );
        self.latest.store(Some(Arc::new(frame)));

        // Listeners read the `frame` property from inside this callback, so
        // it must still name the frame just published.
        let _ = self.frame.set(index);
        self.notify(DeviceEvent::FrameReady);

        if index < max {
            let _ = self.frame.set(index + 1);
            true
        } else if self.looping.load(Ordering::Acquire) {
            pacer.reset();
            let _ = self.frame.set(0);
            true
        } else {
            false
        }
    }

    fn record(&self, index: i32) -> &RecordedFrame {
        &self.manifest.frames[index as usize]
    }

    fn load(
        &self,
        rel: &Path,
        pool: &Arc<BufferPool<Vec<u8>>>,
        info: StreamInfo,
        index: i32,
    ) -> Option<FrameBuffer> {
        match self.read_plane(rel, pool, info) {
            Ok(buffer) => Some(buffer),
            Err(e) => {
                warn!("Dropping buffer of recording frame {}: {}", index, e);
                None
            }
        }
    }

    fn read_plane(
        &self,
        rel: &Path,
        pool: &Arc<BufferPool<Vec<u8>>>,
        info: StreamInfo,
    ) -> Result<FrameBuffer> {
        let path = self.root.join(rel);
        let mut file = File::open(&path).map_err(|e| Error::io(&path, e))?;

        let len = info.frame_bytes();
        let found = file.metadata().map_err(|e| Error::io(&path, e))?.len();
        if found < len as u64 {
            return Err(Error::Recording {
                path,
                reason: format!("expected {} bytes, found {}", len, found),
            });
        }

        // Blocks while every buffer of this role is still referenced
        let mut buf = pool.acquire_pooled();
        buf.resize(len, 0);
        file.read_exact(&mut buf[..len]).map_err(|e| Error::io(&path, e))?;

        Ok(FrameBuffer::new(
            Bytes::from_owner(buf),
            info.width,
            info.height,
            info.format,
        ))
    }
}

/// Writes recordings in the format [`RecordingDevice`] replays
pub struct RecordingWriter {
    root: PathBuf,
    manifest: RecordingManifest,
}

impl RecordingWriter {
    pub fn create(root: impl Into<PathBuf>, depth: StreamInfo, video: StreamInfo) -> Result<Self> {
        let root = root.into();
        for dir in ["depth", "video"] {
            let path = root.join(dir);
            fs::create_dir_all(&path).map_err(|e| Error::io(&path, e))?;
        }
        Ok(Self {
            root,
            manifest: RecordingManifest {
                depth,
                video,
                frames: Vec::new(),
            },
        })
    }

    /// Append a frame; returns its recording-frame number
    pub fn push_frame(
        &mut self,
        timestamp: u64,
        depth: Option<&[u8]>,
        video: Option<&[u8]>,
    ) -> Result<usize> {
        let index = self.manifest.frames.len();
        let depth = depth
            .map(|data| self.write_plane("depth", index, data))
            .transpose()?;
        let video = video
            .map(|data| self.write_plane("video", index, data))
            .transpose()?;

        self.manifest.frames.push(RecordedFrame {
            timestamp,
            depth,
            video,
        });
        Ok(index)
    }

    fn write_plane(&self, dir: &str, index: usize, data: &[u8]) -> Result<PathBuf> {
        let rel = Path::new(dir).join(format!("{index:06}.bin"));
        let path = self.root.join(&rel);
        fs::write(&path, data).map_err(|e| Error::io(&path, e))?;
        Ok(rel)
    }

    /// Write the manifest and return the recording directory
    pub fn finish(self) -> Result<PathBuf> {
        let path = self.root.join(MANIFEST_NAME);
        let text = serde_json::to_string_pretty(&self.manifest)
            .map_err(|e| Error::json(MANIFEST_NAME, e))?;
        fs::write(&path, text).map_err(|e| Error::io(&path, e))?;
        Ok(self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEPTH: StreamInfo = StreamInfo {
        width: 4,
        height: 2,
        format: PixelFormat::Depth16,
    };
    const VIDEO: StreamInfo = StreamInfo {
        width: 4,
        height: 2,
        format: PixelFormat::Rgb24,
    };

    fn write_recording(dir: &Path, frames: usize) -> PathBuf {
        let mut writer = RecordingWriter::create(dir.join("rec"), DEPTH, VIDEO).unwrap();
        for i in 0..frames {
            let depth = vec![i as u8; DEPTH.frame_bytes()];
            let video = vec![i as u8; VIDEO.frame_bytes()];
            writer
                .push_frame(1_000 + i as u64 * 100, Some(&depth), Some(&video))
                .unwrap();
        }
        writer.finish().unwrap()
    }

    fn open(path: PathBuf, lockstep_io: bool) -> (RecordingDevice, Receiver<(DeviceEvent, i32)>) {
        let mut device = RecordingDevice::open(&RecordingConfig {
            path,
            lockstep_io,
            buffer_pool_size: 4,
        })
        .unwrap();
        device.properties().set_bool("frame_throttle", false).unwrap();

        let frame = device.properties().int("frame").unwrap();
        let (tx, rx) = flume::unbounded();
        device.set_event_callback(Box::new(move |event| {
            let _ = tx.send((event, frame.get()));
        }));
        (device, rx)
    }

    fn next(rx: &Receiver<(DeviceEvent, i32)>) -> (DeviceEvent, i32) {
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn manifest_round_trips_through_writer() {
        let dir = tempfile::tempdir().unwrap();
        let root = write_recording(dir.path(), 3);

        let manifest = RecordingManifest::load(&root).unwrap();
        assert_eq!(manifest.frames.len(), 3);
        assert_eq!(manifest.frames[2].timestamp, 1_200);
        assert_eq!(
            manifest.frames[1].depth.as_deref(),
            Some(Path::new("depth/000001.bin"))
        );
    }

    #[test]
    fn empty_recording_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let root = write_recording(dir.path(), 0);
        assert!(matches!(
            RecordingManifest::load(&root),
            Err(Error::Recording { .. })
        ));
    }

    #[test]
    fn single_buffer_per_role_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = RecordingDevice::open(&RecordingConfig {
            path: write_recording(dir.path(), 2),
            lockstep_io: true,
            buffer_pool_size: 1,
        });
        assert!(matches!(result, Err(Error::InvalidSetting(_))));
    }

    #[test]
    fn commit_announces_ready() {
        let dir = tempfile::tempdir().unwrap();
        let (mut device, rx) = open(write_recording(dir.path(), 2), true);

        device.commit_config().unwrap();
        assert_eq!(next(&rx).0, DeviceEvent::Ready);
    }

    #[test]
    fn lockstep_delivers_one_frame_per_request() {
        let dir = tempfile::tempdir().unwrap();
        let (mut device, rx) = open(write_recording(dir.path(), 5), true);
        device.properties().set_int("frame", 2).unwrap();
        device.start().unwrap();

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        device
            .request_frame(RequestFlags::DEPTH | RequestFlags::VIDEO)
            .unwrap();
        assert_eq!(next(&rx), (DeviceEvent::FrameReady, 2));

        let frame = device.latest_frame().unwrap();
        assert_eq!(frame.timestamp(), 1_200);
        assert_eq!(frame.depth().unwrap().data[0], 2);
        assert_eq!(frame.video().unwrap().data.len(), VIDEO.frame_bytes());

        device.request_frame(RequestFlags::DEPTH).unwrap();
        assert_eq!(next(&rx), (DeviceEvent::FrameReady, 3));
        let frame = device.latest_frame().unwrap();
        assert!(frame.has_depth());
        assert!(!frame.has_video());

        device.close().unwrap();
        assert!(device.latest_frame().is_none());
    }

    #[test]
    fn non_looping_playback_stays_on_last_frame() {
        let dir = tempfile::tempdir().unwrap();
        let (mut device, rx) = open(write_recording(dir.path(), 2), true);
        device.properties().set_bool("loop", false).unwrap();
        device.properties().set_int("frame", 1).unwrap();
        device.start().unwrap();

        device.request_frame(RequestFlags::DEPTH).unwrap();
        assert_eq!(next(&rx), (DeviceEvent::FrameReady, 1));
        device.request_frame(RequestFlags::DEPTH).unwrap();
        assert_eq!(next(&rx), (DeviceEvent::FrameReady, 1));
    }

    #[test]
    fn streaming_mode_plays_out_without_requests() {
        let dir = tempfile::tempdir().unwrap();
        let (mut device, rx) = open(write_recording(dir.path(), 4), false);
        device.properties().set_bool("loop", false).unwrap();
        device.start().unwrap();

        let frames: Vec<i32> = (0..4).map(|_| next(&rx).1).collect();
        assert_eq!(frames, vec![0, 1, 2, 3]);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn device_config_overrides_properties() {
        let dir = tempfile::tempdir().unwrap();
        let (mut device, _rx) = open(write_recording(dir.path(), 2), true);
        let config = dir.path().join("device.json");
        fs::write(&config, r#"{"properties": {"loop": false, "frame": 1}}"#).unwrap();

        device.load_config(&config).unwrap();
        assert!(!device.properties().get_bool("loop").unwrap());
        assert_eq!(device.properties().get_int("frame").unwrap(), 1);
    }
}
