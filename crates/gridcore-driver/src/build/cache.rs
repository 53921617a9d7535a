// SPDX-License-Identifier: AGPL-3.0-only

//! Compile hash ledger and on-disk binary cache

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::debug;

use crate::error::{GridError, Result};

type GenerationCell = Arc<OnceLock<std::result::Result<(), String>>>;

/// Compile hashes generated in this process
///
/// Each hash owns a once-cell. The first caller to reach a hash runs the
/// generation; concurrent callers for the same hash block on the cell until
/// it completes, so a hash is generated at most once.
#[derive(Debug, Default)]
pub struct HashLedger {
    entries: Mutex<HashMap<u64, GenerationCell>>,
}

impl HashLedger {
    /// Empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `hash` as generated; true if it was not present
    pub fn add(&self, hash: u64) -> bool {
        let mut entries = self.entries.lock();
        if entries.contains_key(&hash) {
            return false;
        }
        let cell = OnceLock::new();
        let _ = cell.set(Ok(()));
        entries.insert(hash, Arc::new(cell));
        true
    }

    /// `hash` has been recorded
    pub fn exists(&self, hash: u64) -> bool {
        self.entries.lock().contains_key(&hash)
    }

    /// Recorded hashes
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// No hashes recorded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every hash
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Run `generate` unless `hash` was already generated
    ///
    /// Returns `Ok(true)` when this call ran the generation and `Ok(false)`
    /// when another call did. The ledger lock is not held while generating.
    ///
    /// # Errors
    ///
    /// Returns the generation error, to the generating caller as-is and to
    /// callers that waited on it as `BinaryGeneration`.
    pub fn get_or_generate<F>(&self, hash: u64, generate: F) -> Result<bool>
    where
        F: FnOnce() -> Result<()>,
    {
        let cell = {
            let mut entries = self.entries.lock();
            Arc::clone(entries.entry(hash).or_default())
        };

        let mut outcome = None;
        let stored = cell.get_or_init(|| {
            let result = generate();
            let summary = result.as_ref().map(|_| ()).map_err(ToString::to_string);
            outcome = Some(result);
            summary
        });

        match outcome {
            Some(result) => result.map(|()| true),
            None => {
                debug!("Hash {hash:#018x} generated by another compile");
                stored
                    .clone()
                    .map(|()| false)
                    .map_err(|reason| GridError::binary_generation(format!("hash {hash:#018x}"), reason))
            }
        }
    }
}

/// `<root>/<kernel_name>/<hash>/` directory layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryCache {
    root: PathBuf,
}

impl BinaryCache {
    /// Cache rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Cache-relative directory of one build
    pub fn relative_path(kernel_name: &str, hash: u64) -> PathBuf {
        PathBuf::from(kernel_name).join(hash.to_string())
    }

    /// Absolute directory of one build
    pub fn kernel_dir(&self, kernel_name: &str, hash: u64) -> PathBuf {
        self.root.join(Self::relative_path(kernel_name, hash))
    }

    /// Absolute path of a cache-relative suffix
    pub fn path_for(&self, suffix: &Path) -> PathBuf {
        self.root.join(suffix)
    }

    /// Binaries for this build are on disk
    pub fn exists(&self, kernel_name: &str, hash: u64) -> bool {
        self.kernel_dir(kernel_name, hash).is_dir()
    }
}
