// SPDX-License-Identifier: AGPL-3.0-only

//! Toolchain seam
//!
//! The compile pipeline never invokes a compiler directly. It hands
//! [`BuildOptions`] and an output directory to a [`Toolchain`], which must
//! leave one file per [`Processor::image_names`] entry in that directory.

use std::fmt::Debug;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

use super::options::BuildOptions;
use crate::error::{GridError, Result};
use crate::kernel::Processor;

/// Produces kernel images from build options
pub trait Toolchain: Send + Sync + Debug {
    /// Write the images for `options` into `out_dir`
    ///
    /// # Errors
    ///
    /// Returns error if the images cannot be produced.
    fn generate(&self, options: &BuildOptions, out_dir: &Path) -> Result<()>;
}

const IMAGE_MAGIC: &[u8; 4] = b"GCKI";
const IMAGE_ALIGN: usize = 16;

/// Deterministic in-process toolchain
///
/// Each image holds a magic, the descriptor hash and the image name, padded
/// to 16 bytes. Identical options always produce identical images.
#[derive(Debug, Default)]
pub struct SoftwareToolchain {
    generations: AtomicUsize,
}

impl SoftwareToolchain {
    /// New toolchain
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `generate` calls so far
    pub fn generations(&self) -> usize {
        self.generations.load(Ordering::SeqCst)
    }

    /// Image bytes for one file
    pub fn image(options: &BuildOptions, file: &str) -> Vec<u8> {
        let mut image = Vec::with_capacity(64);
        image.extend_from_slice(IMAGE_MAGIC);
        image.extend_from_slice(&options.descriptor_hash().to_le_bytes());
        image.extend_from_slice(file.as_bytes());
        let padded = image.len().div_ceil(IMAGE_ALIGN) * IMAGE_ALIGN;
        image.resize(padded, 0);
        image
    }
}

impl Toolchain for SoftwareToolchain {
    fn generate(&self, options: &BuildOptions, out_dir: &Path) -> Result<()> {
        let processor = options.processor.ok_or_else(|| {
            tracing::error!("Kernel {} has no processor role set", options.name);
            GridError::binary_generation(&options.name, "no processor role set")
        })?;

        for file in processor.image_names() {
            std::fs::write(out_dir.join(file), Self::image(options, file))?;
        }

        let n = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(
            "Generated {} image(s) for {} ({processor}), generation #{n}",
            processor.image_names().len(),
            options.name
        );
        Ok(())
    }
}
