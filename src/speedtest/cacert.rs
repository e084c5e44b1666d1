//! Embedded CA bundle for the speed-test CLI.
//!
//! The CLI runs from a throwaway directory and must not depend on the host
//! having a certificate store, so the bundle ships inside the binary and is
//! staged next to the CLI at run time.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

/// PEM bundle compiled into the binary.
pub static CA_BUNDLE: &[u8] = include_bytes!("../../assets/cacert.pem");

const CERT_FILE_NAME: &str = "cacert.pem";
const CERT_MODE: u32 = 0o600;

/// Writes the bundle into `dir` at mode 0600 and returns its path. The file
/// is fully flushed to disk before the path is handed out; the CLI may be
/// exec'd immediately afterwards.
pub fn stage_ca_bundle(dir: &Path) -> Result<PathBuf, String> {
    let path = dir.join(CERT_FILE_NAME);
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(CERT_MODE)
        .custom_flags(libc::O_CLOEXEC)
        .open(&path)
        .map_err(|e| format!("Failed to create CA bundle file: {e}"))?;

    // write_all retries EINTR and resumes partial writes.
    file.write_all(CA_BUNDLE)
        .map_err(|e| format!("Failed to write CA bundle: {e}"))?;
    file.sync_all()
        .map_err(|e| format!("Failed to sync CA bundle: {e}"))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[test]
    fn staged_bundle_matches_embedded_bytes_at_0600() {
        let tmp = TempDir::new().unwrap();
        let path = stage_ca_bundle(tmp.path()).unwrap();

        let written = std::fs::read(&path).unwrap();
        assert_eq!(written, CA_BUNDLE);

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, CERT_MODE);
    }

    #[test]
    fn bundle_looks_like_pem() {
        let text = std::str::from_utf8(CA_BUNDLE).unwrap();
        assert!(text.contains("-----BEGIN CERTIFICATE-----"));
        assert!(text.contains("-----END CERTIFICATE-----"));
    }

    #[test]
    fn staging_twice_in_one_dir_fails_cleanly() {
        let tmp = TempDir::new().unwrap();
        stage_ca_bundle(tmp.path()).unwrap();
        assert!(stage_ca_bundle(tmp.path()).is_err());
    }
}
