//! Session integration log
//!
//! A fixed-size ring of per-frame records, purely observational: the
//! downstream bundle pipeline consumes it, the engine never reads it back.

use std::collections::VecDeque;

use glam::Mat4;
use serde::Serialize;

use crate::constants::RECORD_RING_CAPACITY;
use crate::frame::CameraIntrinsics;
use crate::voxel::BlockIndex;

/// One integrated frame, as it went into the field.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrationRecord {
    pub timestamp: f64,
    pub pose: Mat4,
    pub intrinsics: CameraIntrinsics,
    pub affected_blocks: Vec<BlockIndex>,
    pub is_keyframe: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyframe_id: Option<u32>,
}

pub struct RecordRing {
    records: VecDeque<IntegrationRecord>,
}

impl RecordRing {
    pub fn new() -> Self {
        Self {
            records: VecDeque::with_capacity(RECORD_RING_CAPACITY),
        }
    }

    /// Append a record, dropping the oldest once the ring is full.
    pub fn push(&mut self, record: IntegrationRecord) {
        if self.records.len() == RECORD_RING_CAPACITY {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &IntegrationRecord> {
        self.records.iter()
    }

    /// Render the ring oldest-to-newest as JSON for downstream consumers.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let ordered: Vec<&IntegrationRecord> = self.records.iter().collect();
        serde_json::to_string(&ordered)
    }
}

impl Default for RecordRing {
    fn default() -> Self {
        Self::new()
    }
}
