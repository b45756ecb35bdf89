//! The key → location table and the neighbor-selection heuristic.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::file;
use crate::{Location, Result, StoreError};

/// Scalar fingerprint of a string: the sum of its character codes.
pub fn fingerprint(s: &str) -> u64 {
    s.chars().map(|c| u64::from(u32::from(c))).sum()
}

/// Persistent key → location table.
///
/// Readers run concurrently; each writer holds the lock across both the
/// in-memory change and the file rewrite, so a successful mutation is
/// always on disk and a failed one leaves memory untouched.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    files: RwLock<BTreeMap<String, Location>>,
}

impl Store {
    /// Open the store at `path`, creating an empty file if none exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let files = if path.exists() {
            let files = file::load(&path)?;
            debug!(path = %path.display(), entries = files.len(), "store loaded");
            files
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::Persistence {
                    path: parent.display().to_string(),
                    source,
                })?;
            }
            let files = BTreeMap::new();
            file::save(&path, &files)?;
            debug!(path = %path.display(), "store created");
            files
        };

        Ok(Self {
            path,
            files: RwLock::new(files),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or replace the location of `key`.
    pub fn put(&self, key: &str, location: Location) -> Result<()> {
        let mut files = self.write();
        let previous = files.insert(key.to_string(), location.clone());

        if let Err(err) = file::save(&self.path, &files) {
            match previous {
                Some(prev) => files.insert(key.to_string(), prev),
                None => files.remove(key),
            };
            return Err(err);
        }

        debug!(%key, %location, "store entry written");
        Ok(())
    }

    /// Remember that `peer` holds `key`, unless this node holds it itself.
    ///
    /// Returns `true` if the table changed. A [`Location::Local`] entry is
    /// never replaced, and rewriting an identical entry is skipped.
    pub fn cache_route(&self, key: &str, peer: &str) -> Result<bool> {
        let mut files = self.write();
        match files.get(key) {
            Some(Location::Local) => return Ok(false),
            Some(Location::Peer(current)) if current == peer => return Ok(false),
            _ => {}
        }

        let previous = files.insert(key.to_string(), Location::Peer(peer.to_string()));
        if let Err(err) = file::save(&self.path, &files) {
            match previous {
                Some(prev) => files.insert(key.to_string(), prev),
                None => files.remove(key),
            };
            return Err(err);
        }

        debug!(%key, %peer, "route cached");
        Ok(true)
    }

    pub fn get(&self, key: &str) -> Option<Location> {
        self.read().get(key).cloned()
    }

    /// Delete `key`, returning its previous location.
    ///
    /// Removing an absent key does not touch the file.
    pub fn remove(&self, key: &str) -> Result<Option<Location>> {
        let mut files = self.write();
        let Some(previous) = files.remove(key) else {
            return Ok(None);
        };

        if let Err(err) = file::save(&self.path, &files) {
            files.insert(key.to_string(), previous);
            return Err(err);
        }

        debug!(%key, "store entry removed");
        Ok(Some(previous))
    }

    /// Snapshot of every entry, ordered by key.
    pub fn list(&self) -> BTreeMap<String, Location> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Pick the peer most likely to know about `target_key`.
    ///
    /// Every entry with a peer location not in `excluding` is a candidate;
    /// its score is the distance between the fingerprint of its key and the
    /// fingerprint of `target_key`. The lowest score wins, ties going to the
    /// lexicographically smallest address.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the table is empty or every entry
    /// is local or excluded.
    pub fn nearest_neighbor<'a, I>(&self, target_key: &str, excluding: I) -> Result<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let excluded: HashSet<&str> = excluding.into_iter().collect();
        let target = fingerprint(target_key);
        let files = self.read();

        let mut best: Option<(u64, &str)> = None;
        for (key, location) in files.iter() {
            let Some(peer) = location.peer() else {
                continue;
            };
            if excluded.contains(peer) {
                continue;
            }

            let candidate = (fingerprint(key).abs_diff(target), peer);
            if best.map_or(true, |current| candidate < current) {
                best = Some(candidate);
            }
        }

        match best {
            Some((distance, peer)) => {
                debug!(%target_key, %peer, distance, "nearest neighbor selected");
                Ok(peer.to_string())
            }
            None => Err(StoreError::NotFound(target_key.to_string())),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Location>> {
        self.files.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Location>> {
        self.files.write().unwrap_or_else(PoisonError::into_inner)
    }
}
