use std::path::{Path, PathBuf};

use motion_target::capture::recording::StreamInfo;
use motion_target::capture::{PixelFormat, RecordingWriter};

pub const DEPTH: StreamInfo = StreamInfo {
    width: 4,
    height: 4,
    format: PixelFormat::Depth16,
};

pub const VIDEO: StreamInfo = StreamInfo {
    width: 4,
    height: 4,
    format: PixelFormat::Rgb24,
};

/// Frames at 1000 + 100 * i ns with a subject `depth_mm` away in the
/// centre of the depth image
pub fn write_recording(dir: &Path, frames: usize, depth_mm: u16) -> PathBuf {
    let mut writer = RecordingWriter::create(dir.join("recording"), DEPTH, VIDEO).unwrap();

    let mut depth = vec![0u16; DEPTH.pixels()];
    for (x, y) in [(1, 1), (2, 1), (1, 2), (2, 2)] {
        depth[y * DEPTH.width as usize + x] = depth_mm;
    }
    let depth: Vec<u8> = depth.iter().flat_map(|d| d.to_le_bytes()).collect();

    for i in 0..frames {
        let video = vec![i as u8; VIDEO.frame_bytes()];
        writer
            .push_frame(1_000 + i as u64 * 100, Some(&depth), Some(&video))
            .unwrap();
    }
    writer.finish().unwrap()
}

/// Target file names listed in the index, in order
pub fn index_entries(index: &Path) -> Vec<String> {
    std::fs::read_to_string(index)
        .unwrap()
        .lines()
        .map(str::to_owned)
        .collect()
}
