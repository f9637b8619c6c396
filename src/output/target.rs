//! Motion-target files: one JSON document per frame plus a run-long index

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::ser::{Serialize, SerializeMap, Serializer};
use tracing::{info, instrument};

use super::OutputSink;
use crate::error::{Error, Result};
use crate::tracking::{Skeleton, TrackingResult};

/// Separates the bone name from the bone part in joint names
pub const BONE_SEPARATOR: char = '.';

#[derive(Debug, Clone, PartialEq)]
pub struct Bone {
    pub name: String,
    /// `(part, position)` in first-seen order
    pub parts: Vec<(String, [f32; 3])>,
}

impl Serialize for Bone {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.parts.len() + 1))?;
        map.serialize_entry("name", &self.name)?;
        for (part, position) in &self.parts {
            map.serialize_entry(part, position)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Target {
    pub bones: Vec<Bone>,
}

impl Target {
    /// Group `bone.part` joints by bone. Fails with the index of the first
    /// joint that is missing or unnamed.
    pub fn from_skeleton(skeleton: &Skeleton) -> std::result::Result<Self, usize> {
        let mut bones: Vec<Bone> = Vec::new();

        for (index, joint) in skeleton.joints.iter().enumerate() {
            let Some(name) = joint.as_ref().and_then(|j| j.name.as_deref()) else {
                return Err(index);
            };
            let Some((bone_name, part)) = name.split_once(BONE_SEPARATOR) else {
                continue;
            };
            let position = joint.as_ref().map_or([0.0; 3], |j| j.position);

            match bones.iter_mut().find(|b| b.name == bone_name) {
                Some(bone) => match bone.parts.iter_mut().find(|(p, _)| p == part) {
                    Some(existing) => existing.1 = position,
                    None => bone.parts.push((part.into(), position)),
                },
                None => bones.push(Bone {
                    name: bone_name.into(),
                    parts: vec![(part.into(), position)],
                }),
            }
        }

        Ok(Self { bones })
    }
}

pub fn target_file_name(frame_no: u32) -> String {
    format!("{frame_no:06}.json")
}

/// Writes targets into an output directory and lists them in an index
pub struct TargetWriter {
    out_dir: PathBuf,
    index_path: PathBuf,
    index: BufWriter<File>,
    written: usize,
}

impl TargetWriter {
    /// Truncate or create the index file inside an existing `out_dir`
    #[instrument(skip_all, fields(out_dir = %out_dir.as_ref().display()))]
    pub fn create(out_dir: impl AsRef<Path>, index_name: &str) -> Result<Self> {
        let out_dir = out_dir.as_ref().to_path_buf();
        let index_path = out_dir.join(index_name);
        let file = File::create(&index_path).map_err(|e| Error::io(&index_path, e))?;
        info!("Writing target index to {}", index_path.display());

        Ok(Self {
            out_dir,
            index_path,
            index: BufWriter::new(file),
            written: 0,
        })
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl OutputSink for TargetWriter {
    fn write_target(&mut self, tracking: &TrackingResult, frame_no: u32) -> Result<bool> {
        let target = match Target::from_skeleton(&tracking.skeleton) {
            Ok(target) => target,
            Err(joint) => {
                info!("Skipping frame {} (failed to track joint {})", frame_no, joint);
                return Ok(false);
            }
        };

        let name = target_file_name(frame_no);
        let path = self.out_dir.join(&name);
        let json = serde_json::to_vec_pretty(&target).map_err(|e| Error::json(&name, e))?;
        fs::write(&path, json).map_err(|e| Error::io(&path, e))?;

        writeln!(self.index, "{name}")
            .and_then(|_| self.index.flush())
            .map_err(|e| Error::io(&self.index_path, e))?;

        self.written += 1;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::Joint;
    use serde_json::json;

    fn skeleton(joints: Vec<Option<Joint>>) -> Skeleton {
        Skeleton { joints }
    }

    #[test]
    fn groups_parts_by_bone_in_first_seen_order() {
        let target = Target::from_skeleton(&skeleton(vec![
            Some(Joint::new("spine.head", [0.0, 1.0, 2.0])),
            Some(Joint::new("arm.head", [1.0, 1.0, 1.0])),
            Some(Joint::new("spine.tail", [0.0, 0.0, 2.0])),
            Some(Joint::new("root", [9.0, 9.0, 9.0])),
        ]))
        .unwrap();

        assert_eq!(target.bones.len(), 2);
        assert_eq!(target.bones[0].name, "spine");
        assert_eq!(target.bones[0].parts.len(), 2);
        assert_eq!(target.bones[1].name, "arm");

        let value = serde_json::to_value(&target).unwrap();
        assert_eq!(
            value,
            json!({"bones": [
                {"name": "spine", "head": [0.0, 1.0, 2.0], "tail": [0.0, 0.0, 2.0]},
                {"name": "arm", "head": [1.0, 1.0, 1.0]}
            ]})
        );
    }

    #[test]
    fn unnamed_or_missing_joint_fails_the_frame() {
        let unnamed = Joint {
            name: None,
            position: [0.0; 3],
        };
        assert_eq!(
            Target::from_skeleton(&skeleton(vec![
                Some(Joint::new("a.b", [0.0; 3])),
                Some(unnamed)
            ])),
            Err(1)
        );
        assert_eq!(Target::from_skeleton(&skeleton(vec![None])), Err(0));
    }

    #[test]
    fn writes_file_and_index_line() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = TargetWriter::create(dir.path(), "targets.index").unwrap();

        let tracking = TrackingResult::success(
            10,
            skeleton(vec![Some(Joint::new("head.tail", [0.5, 0.25, 1.0]))]),
        );
        assert!(writer.write_target(&tracking, 7).unwrap());
        assert!(writer.write_target(&tracking, 12).unwrap());

        let index = fs::read_to_string(dir.path().join("targets.index")).unwrap();
        assert_eq!(index, "000007.json\n000012.json\n");

        let doc: serde_json::Value =
            serde_json::from_slice(&fs::read(dir.path().join("000007.json")).unwrap()).unwrap();
        assert_eq!(doc["bones"][0]["tail"], json!([0.5, 0.25, 1.0]));
        assert_eq!(writer.written(), 2);
    }

    #[test]
    fn skipped_frame_leaves_no_trace() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = TargetWriter::create(dir.path(), "targets.index").unwrap();

        let tracking = TrackingResult::success(10, skeleton(vec![None]));
        assert!(!writer.write_target(&tracking, 3).unwrap());
        assert!(!dir.path().join("000003.json").exists());
        assert_eq!(
            fs::read_to_string(dir.path().join("targets.index")).unwrap(),
            ""
        );
    }
}
