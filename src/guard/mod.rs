//! Size and duration ceilings for deliverable artifacts.

use std::path::Path;

use crate::{PipelineError, Result};

/// Platform ceiling on uploaded file size.
pub const MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// Ceiling on source duration for URL acquisition, checked before any
/// download is attempted.
pub const MAX_SOURCE_SECS: u64 = 60 * 60;

/// Enforces the byte-size and duration ceilings.
#[derive(Debug, Clone, Copy)]
pub struct SizeGuard {
    max_upload_bytes: u64,
    max_source_secs: u64,
}

impl Default for SizeGuard {
    fn default() -> Self {
        Self {
            max_upload_bytes: MAX_UPLOAD_BYTES,
            max_source_secs: MAX_SOURCE_SECS,
        }
    }
}

impl SizeGuard {
    pub fn new(max_upload_bytes: u64, max_source_secs: u64) -> Self {
        Self {
            max_upload_bytes,
            max_source_secs,
        }
    }

    /// Reject a source whose reported duration exceeds the ceiling.
    ///
    /// Applied to acquisition before spending any time on download; a source
    /// exactly at the ceiling passes.
    pub fn check_source_duration(&self, duration_secs: u64) -> Result<()> {
        if duration_secs > self.max_source_secs {
            return Err(PipelineError::RequestTooLarge(format!(
                "Source is {} long; the limit is {}",
                crate::timecode::format(duration_secs),
                crate::timecode::format(self.max_source_secs),
            ))
            .into());
        }
        Ok(())
    }

    /// Check an artifact's byte size against the upload ceiling.
    ///
    /// Returns the size on success; a file exactly at the ceiling passes, one
    /// byte above fails.
    pub fn check_upload_size(&self, path: &Path) -> Result<u64> {
        let size = fs_err::metadata(path)?.len();
        if size > self.max_upload_bytes {
            return Err(PipelineError::RequestTooLarge(format!(
                "File is {}; the upload limit is {}",
                crate::utils::format_file_size(size),
                crate::utils::format_file_size(self.max_upload_bytes),
            ))
            .into());
        }
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PipelineError;
    use std::fs;

    fn is_too_large(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::RequestTooLarge(_))
        )
    }

    #[test]
    fn test_default_ceilings() {
        let guard = SizeGuard::default();
        assert_eq!(guard.max_upload_bytes, 50 * 1024 * 1024);
        assert_eq!(guard.max_source_secs, 3600);
    }

    #[test]
    fn test_duration_boundary() {
        let guard = SizeGuard::default();
        assert!(guard.check_source_duration(3600).is_ok());
        let err = guard.check_source_duration(3601).unwrap_err();
        assert!(is_too_large(&err));
    }

    #[test]
    fn test_size_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let at = dir.path().join("at.mp3");
        let over = dir.path().join("over.mp3");
        fs::write(&at, vec![0u8; 8]).unwrap();
        fs::write(&over, vec![0u8; 9]).unwrap();

        let guard = SizeGuard::new(8, 3600);
        assert_eq!(guard.check_upload_size(&at).unwrap(), 8);
        let err = guard.check_upload_size(&over).unwrap_err();
        assert!(is_too_large(&err));
    }
}
