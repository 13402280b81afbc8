//! Named sound registry.

use std::collections::HashMap;

use chime_core::{Error, Result, SampleFormat};

use crate::device::BufferId;

/// A registered sound: its device buffer plus the decoded payload.
///
/// The raw bytes stay alive for the entry's whole lifetime because device
/// copy semantics on upload are backend-defined; the conservative owned
/// copy makes the entry correct on every backend. Entries are never
/// mutated after insertion and only go away at session teardown.
#[derive(Debug)]
pub struct SoundEntry {
    pub buffer: BufferId,
    pub sample_rate: u32,
    pub format: SampleFormat,
    pub data: Vec<u8>,
}

/// Insert-only mapping from sound name to entry. Names are unique; there
/// is no overwrite and no unload.
#[derive(Debug, Default)]
pub struct SoundRegistry {
    entries: HashMap<String, SoundEntry>,
}

impl SoundRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail-fast duplicate check, done before any resource is acquired on
    /// the sound's behalf.
    pub fn ensure_vacant(&self, name: &str) -> Result<()> {
        if self.entries.contains_key(name) {
            return Err(Error::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    pub fn insert(&mut self, name: String, entry: SoundEntry) -> Result<()> {
        self.ensure_vacant(&name)?;
        self.entries.insert(name, entry);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&SoundEntry> {
        self.entries
            .get(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove and yield every entry. Used only at teardown.
    pub fn drain(&mut self) -> impl Iterator<Item = SoundEntry> + '_ {
        self.entries.drain().map(|(_, entry)| entry)
    }
}
