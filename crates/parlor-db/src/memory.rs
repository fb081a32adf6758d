use std::sync::Mutex;

use anyhow::{Result, anyhow};

use parlor_types::models::Channel;

use crate::store::{DocumentStore, Snapshot};

/// In-process document store. Starts like a first boot: only `general`.
pub struct MemoryStore {
    snapshot: Mutex<Snapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::from_snapshot(Snapshot {
            channels: vec![Channel::general()],
            ..Snapshot::default()
        })
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemoryStore {
    fn read_all(&self) -> Result<Snapshot> {
        let snapshot = self
            .snapshot
            .lock()
            .map_err(|e| anyhow!("memory store poisoned: {}", e))?;
        Ok(snapshot.clone())
    }

    fn write_all(&self, snapshot: &Snapshot) -> Result<()> {
        let mut current = self
            .snapshot
            .lock()
            .map_err(|e| anyhow!("memory store poisoned: {}", e))?;
        *current = snapshot.clone();
        Ok(())
    }
}
