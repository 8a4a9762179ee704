// Capped, append-only trajectory log persisted under `trajectory:{session}`.

use std::collections::VecDeque;
use std::sync::Arc;

use annotator_common::types::TrajectoryEntry;
use anyhow::Result;

use crate::store::{load_trajectory, save_json, SharedStore, StoreKey};

pub const DEFAULT_TRAJECTORY_CAP: usize = 50;

pub struct TrajectoryLog {
    key: StoreKey,
    cap: usize,
    entries: VecDeque<TrajectoryEntry>,
    store: Arc<dyn SharedStore>,
}

impl TrajectoryLog {
    /// Resume the log for `session_id`, trimmed to `cap` newest entries.
    pub fn load(store: Arc<dyn SharedStore>, session_id: &str, cap: usize) -> Result<Self> {
        let cap = cap.max(1);
        let mut entries: VecDeque<TrajectoryEntry> =
            load_trajectory(store.as_ref(), session_id)?.into();
        while entries.len() > cap {
            entries.pop_front();
        }
        Ok(Self { key: StoreKey::Trajectory(session_id.to_string()), cap, entries, store })
    }

    /// Append and persist; the oldest entry falls off past the cap.
    pub fn push(&mut self, entry: TrajectoryEntry) -> Result<()> {
        self.entries.push_back(entry);
        while self.entries.len() > self.cap {
            self.entries.pop_front();
        }
        save_json(self.store.as_ref(), &self.key, &self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &TrajectoryEntry> {
        self.entries.iter()
    }
}
