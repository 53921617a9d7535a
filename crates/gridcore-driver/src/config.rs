// SPDX-License-Identifier: AGPL-3.0-only

//! Build and dispatch configuration
//!
//! Environment overrides:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `GRIDCORE_BUILD_DIR` | [`BuildConfig::output_dir`] |
//! | `GRIDCORE_PERSISTENT_CACHE` | [`BuildConfig::persistent_cache`] (`1`/`true`) |
//! | `GRIDCORE_COMPILE_THREADS` | [`BuildConfig::worker_threads`] |

use gridcore_chip::command::BankKind;
use gridcore_chip::memory_map::DEVICE_COMMAND_DATA_SIZE;
use gridcore_chip::noc::noc_xy_encoding;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::dispatch::BankDescriptor;

/// Compile pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    /// Root of the binary cache
    pub output_dir: PathBuf,

    /// Accept binaries already on disk as cache hits
    pub persistent_cache: bool,

    /// Compile pool size; `None` uses the global rayon pool
    pub worker_threads: Option<usize>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            output_dir: std::env::temp_dir().join("gridcore").join("kernels"),
            persistent_cache: false,
            worker_threads: None,
        }
    }
}

impl BuildConfig {
    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("GRIDCORE_BUILD_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        if let Ok(v) = std::env::var("GRIDCORE_PERSISTENT_CACHE") {
            config.persistent_cache = matches!(v.as_str(), "1" | "true" | "TRUE" | "yes");
        }
        if let Ok(v) = std::env::var("GRIDCORE_COMPILE_THREADS") {
            match v.parse::<usize>() {
                Ok(n) if n > 0 => config.worker_threads = Some(n),
                _ => warn!("Ignoring GRIDCORE_COMPILE_THREADS={v}: expected a positive integer"),
            }
        }

        debug!(
            "Build config: output_dir={}, persistent_cache={}, worker_threads={:?}",
            config.output_dir.display(),
            config.persistent_cache,
            config.worker_threads
        );
        config
    }

    /// Configuration rooted at `output_dir`
    pub fn with_output_dir(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }
}

/// Dispatch executor configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Bytes available for one burst in staging memory
    pub staging_capacity: u32,

    /// Interleaved DRAM banks, in page order
    pub dram_banks: Vec<BankDescriptor>,

    /// Interleaved L1 banks, in page order
    pub l1_banks: Vec<BankDescriptor>,
}

impl Default for DispatchConfig {
    /// Eight DRAM banks along row 0 and one L1 bank at (1, 1)
    fn default() -> Self {
        Self {
            staging_capacity: DEVICE_COMMAND_DATA_SIZE,
            dram_banks: (1..=8)
                .map(|x| BankDescriptor {
                    noc_xy: noc_xy_encoding(x, 0),
                    offset: 0,
                })
                .collect(),
            l1_banks: vec![BankDescriptor {
                noc_xy: noc_xy_encoding(1, 1),
                offset: 0,
            }],
        }
    }
}

impl DispatchConfig {
    /// Banks serving `kind`
    pub fn banks(&self, kind: BankKind) -> &[BankDescriptor] {
        match kind {
            BankKind::Interleaved => &self.dram_banks,
            BankKind::Local => &self.l1_banks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_uses_global_pool() {
        let config = BuildConfig::default();
        assert!(!config.persistent_cache);
        assert_eq!(config.worker_threads, None);
        assert!(config.output_dir.ends_with("kernels"));
    }

    #[test]
    fn with_output_dir_keeps_other_defaults() {
        let config = BuildConfig::with_output_dir("/tmp/x");
        assert_eq!(config.output_dir, PathBuf::from("/tmp/x"));
        assert!(!config.persistent_cache);
    }

    #[test]
    fn dispatch_default_stages_full_region() {
        let config = DispatchConfig::default();
        assert_eq!(config.staging_capacity, DEVICE_COMMAND_DATA_SIZE);
        assert_eq!(config.banks(BankKind::Interleaved).len(), 8);
        assert_eq!(config.banks(BankKind::Interleaved)[0].noc_xy, noc_xy_encoding(1, 0));
        assert_eq!(config.banks(BankKind::Local), &[BankDescriptor { noc_xy: noc_xy_encoding(1, 1), offset: 0 }]);
    }
}
