//! Image preparation pipeline: inspect a base image's format and create
//! per-task copy-on-write overlays sized to the task's disk request.
//!
//! A base cloud image is shared read-only across tasks; per-task writes
//! never touch it; destroying a task is `unlink(dst)`. This gives O(seconds)
//! provisioning without image duplication.

mod format;
mod overlay;
mod pathsafety;

pub use format::{detect_format, ImageFormat};
pub use overlay::create_overlay;
pub use pathsafety::{resolve_allowed, AllowedRoots};

use crate::error::ImageError;
use std::path::PathBuf;

/// Inputs to a single image preparation call.
#[derive(Debug, Clone)]
pub struct ImageSpec {
    /// Base path; must exist and resolve under an allowed root.
    pub base_path: PathBuf,
    /// Requested overlay size in MiB; `None` when no overlay is requested.
    pub requested_size_mib: Option<u64>,
    /// Overlay destination, derived by the caller from data dir + domain name.
    pub overlay_dest: PathBuf,
}

impl ImageSpec {
    /// `sizeMiB > 0` is required whenever an overlay is requested.
    pub fn validate(&self) -> Result<(), ImageError> {
        if let Some(size) = self.requested_size_mib {
            if size == 0 {
                return Err(ImageError::InvalidSize(
                    "overlay size must be greater than zero MiB".to_string(),
                ));
            }
        }
        Ok(())
    }
}
