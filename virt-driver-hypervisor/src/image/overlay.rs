//! Copy-on-write overlay creation.

use std::path::Path;
use std::process::Command;
use tracing::{info, instrument};

use crate::error::ImageError;

/// Creates a copy-on-write file at `dst` backed by `base`, both tagged
/// `qcow2`, with virtual size `size_mib`.
///
/// Preconditions: `size_mib > 0`, `base` exists, `dst`'s parent directory is
/// writable. Post-condition: `dst` exists and opens cleanly; `base` is
/// unmodified — `qemu-img create -b` never touches the backing file.
#[instrument(fields(base = %base.display(), dst = %dst.display(), size_mib))]
pub fn create_overlay(base: &Path, dst: &Path, size_mib: u64) -> Result<(), ImageError> {
    if size_mib == 0 {
        return Err(ImageError::InvalidSize("overlay size must be greater than zero MiB".to_string()));
    }
    if !base.exists() {
        return Err(ImageError::NotFound(base.display().to_string()));
    }
    if dst.exists() {
        return Err(ImageError::ToolFailed(format!("overlay destination already exists: {}", dst.display())));
    }
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ImageError::ToolFailed(format!("failed to create overlay directory: {e}")))?;
    }

    let size_arg = format!("{size_mib}M");
    let output = Command::new("qemu-img")
        .args([
            "create",
            "-f", "qcow2",
            "-F", "qcow2",
            "-b", &base.to_string_lossy(),
            &dst.to_string_lossy(),
            &size_arg,
        ])
        .output()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ImageError::ToolMissing(format!("qemu-img not found: {e}"))
            } else {
                ImageError::ToolFailed(format!("failed to execute qemu-img: {e}"))
            }
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ImageError::ToolFailed(format!("qemu-img create failed: {stderr}")));
    }

    info!(dst = %dst.display(), base = %base.display(), size_mib, "overlay created");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn zero_size_rejected() {
        let err = create_overlay(&PathBuf::from("/tmp/base.qcow2"), &PathBuf::from("/tmp/dst.qcow2"), 0).unwrap_err();
        assert!(matches!(err, ImageError::InvalidSize(_)));
    }

    #[test]
    fn missing_base_is_not_found() {
        let err = create_overlay(
            &PathBuf::from("/nonexistent/base.qcow2"),
            &PathBuf::from("/tmp/virt-driver-test-dst.qcow2"),
            1024,
        )
        .unwrap_err();
        assert!(matches!(err, ImageError::NotFound(_)));
    }
}
