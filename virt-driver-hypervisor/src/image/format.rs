//! Image format detection via the platform's image-info tool (`qemu-img`).

use std::path::Path;
use std::process::Command;
use tracing::{debug, instrument};

use crate::error::ImageError;

/// Detected disk image metadata.
#[derive(Debug, Clone)]
pub struct ImageFormat {
    pub format: String,
    pub virtual_size_bytes: u64,
}

/// Runs `qemu-img info --output=json` against `path` and parses the
/// `format`/`virtual-size` fields.
///
/// Failure modes are kept distinct from "image not found": a missing tool
/// is `ToolMissing`, a non-zero exit or unparsable output is `ToolFailed`,
/// and only a missing path itself is `NotFound`.
#[instrument(fields(path = %path.display()))]
pub fn detect_format(path: &Path) -> Result<ImageFormat, ImageError> {
    if !path.exists() {
        return Err(ImageError::NotFound(path.display().to_string()));
    }

    debug!("running qemu-img info");
    let output = Command::new("qemu-img")
        .args(["info", "--output=json", &path.to_string_lossy()])
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
        return Err(ImageError::ToolFailed(format!("qemu-img info failed: {stderr}")));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let value: serde_json::Value = serde_json::from_str(&stdout)
        .map_err(|e| ImageError::ToolFailed(format!("malformed qemu-img json: {e}")))?;

    let format = value["format"]
        .as_str()
        .ok_or_else(|| ImageError::ToolFailed("qemu-img output missing format field".to_string()))?
        .to_string();
    let virtual_size_bytes = value["virtual-size"].as_u64().unwrap_or(0);

    Ok(ImageFormat { format, virtual_size_bytes })
}
