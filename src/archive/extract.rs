//! Hardened tgz extraction.
//!
//! # Invariants
//! - No filesystem entry is ever created outside the destination directory.
//! - No symbolic or hard links are ever created; archives carrying them
//!   abort the whole extraction.
//! - Quotas hold at every header boundary: at most 10 000 records, 100 MiB
//!   per file, 500 MiB total.
//! - A file that was opened but not committed is removed on every error
//!   path. Directories created along the way are retained.
//!
//! # Algorithm
//! - Stream 512-byte ustar blocks out of the gzip decoder, strictly in
//!   archive order.
//! - Per entry: checksum, field screening, quota checks, path sanitization,
//!   then dispatch on the typeflag.
//! - Regular payloads are copied in 16 KiB chunks; padding and skipped
//!   payloads are discarded forward (a compressed stream cannot seek).

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::archive::gzip::GzipStream;
use crate::archive::header::{
    is_zero_block, pad_len, text_field, EntryKind, FieldFault, HeaderView, TAR_BLOCK_LEN,
};
use crate::archive::path::sanitize_entry_path;
use crate::config::{
    TGZ_MAX_FILES, TGZ_MAX_FILE_SIZE, TGZ_MAX_NAME_LENGTH, TGZ_MAX_TOTAL_SIZE,
};

const COPY_CHUNK: usize = 16 * 1024;
const DIR_MODE: u32 = 0o750;
const FILE_MODE: u32 = 0o600;

/// Extraction failure. The first error aborts the run; later entries are
/// not processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("Failed to open TGZ file")]
    OpenFileFailed,
    #[error("Failed to read compressed data")]
    ReadFailed,
    #[error("Invalid TAR header format")]
    InvalidHeader,
    #[error("TAR header checksum validation failed")]
    InvalidChecksum,
    #[error("Failed to create directory")]
    CreateDirFailed,
    #[error("Failed to write output file")]
    WriteFileFailed,
    #[error("Dangerous path detected (directory traversal attempt)")]
    PathTraversalDetected,
    #[error("File size exceeds maximum allowed size")]
    FileTooLarge,
    #[error("Archive total size exceeds maximum allowed size")]
    ArchiveTooLarge,
    #[error("Symlink detected (potential security risk)")]
    SymlinkDetected,
    #[error("Unicode-based path attack detected")]
    UnicodeAttackDetected,
}

/// Extracts a gzip-compressed POSIX ustar archive under `dest_dir`.
///
/// Only regular files and directories are materialized. Link entries abort
/// the extraction; other typeflags have their payloads skipped.
pub fn extract(tgz_path: &Path, dest_dir: &Path) -> Result<(), ExtractError> {
    let file = File::open(tgz_path).map_err(|_| ExtractError::OpenFileFailed)?;
    let mut gz = GzipStream::new(file);

    let mut bytes_extracted: u64 = 0;
    let mut files_seen: u32 = 0;
    let mut block = [0u8; TAR_BLOCK_LEN];

    loop {
        match gz.read_exact_or_eof(&mut block) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(ExtractError::InvalidHeader)
            }
            Err(_) => return Err(ExtractError::ReadFailed),
        }

        if is_zero_block(&block) {
            break;
        }

        files_seen += 1;
        if files_seen > TGZ_MAX_FILES {
            return Err(ExtractError::ArchiveTooLarge);
        }

        let header = HeaderView::new(&block);
        if !header.checksum_ok() {
            return Err(ExtractError::InvalidChecksum);
        }

        let name = screen_field(header.name_bytes())?;
        let prefix = screen_field(header.prefix_bytes())?;
        let kind = header.kind();
        let size = header.size();

        if matches!(kind, EntryKind::HardLink | EntryKind::SymbolicLink) {
            return Err(ExtractError::SymlinkDetected);
        }

        if size > TGZ_MAX_FILE_SIZE {
            return Err(ExtractError::FileTooLarge);
        }
        if size > TGZ_MAX_TOTAL_SIZE - bytes_extracted {
            return Err(ExtractError::ArchiveTooLarge);
        }

        let mut combined = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}/{name}")
        };
        // tar marks directories with a trailing separator; drop it before
        // component validation.
        if combined.ends_with('/') {
            combined.pop();
        }

        let entry_path = sanitize_entry_path(dest_dir, &combined)
            .ok_or(ExtractError::PathTraversalDetected)?;

        match kind {
            EntryKind::Directory => {
                create_dir_secure(&entry_path)?;
            }
            EntryKind::RegularFile => {
                if let Some(parent) = entry_path.parent() {
                    if parent != dest_dir {
                        create_dir_secure(parent)?;
                    }
                }

                let mut pending = PendingFile::create(&entry_path)?;
                copy_payload(&mut gz, &mut pending, size)?;
                gz.skip(pad_len(size)).map_err(|_| ExtractError::ReadFailed)?;
                pending.commit();
                bytes_extracted += size;
            }
            EntryKind::Other => {
                gz.skip(size.checked_add(pad_len(size)).ok_or(ExtractError::FileTooLarge)?)
                    .map_err(|_| ExtractError::ReadFailed)?;
                bytes_extracted += size;
            }
            EntryKind::HardLink | EntryKind::SymbolicLink => unreachable!(),
        }
    }

    Ok(())
}

fn screen_field(field: &[u8]) -> Result<&str, ExtractError> {
    text_field(field, TGZ_MAX_NAME_LENGTH).map_err(|fault| match fault {
        FieldFault::NonAscii => ExtractError::UnicodeAttackDetected,
        FieldFault::ControlByte | FieldFault::Overlong => ExtractError::InvalidHeader,
    })
}

/// Creates `dir_path` and any missing ancestors with mode 0o750. Existing
/// directories are accepted; an existing entry of any other kind (a symlink
/// in particular) aborts.
fn create_dir_secure(dir_path: &Path) -> Result<(), ExtractError> {
    if let Some(parent) = dir_path.parent() {
        if parent != dir_path && !parent.as_os_str().is_empty() {
            create_dir_secure(parent)?;
        }
    }

    let c_path = path_cstring(dir_path).ok_or(ExtractError::CreateDirFailed)?;
    if unsafe { libc::mkdir(c_path.as_ptr(), DIR_MODE as libc::mode_t) } == 0 {
        return Ok(());
    }

    if io::Error::last_os_error().raw_os_error() == Some(libc::EEXIST) {
        return match fs::symlink_metadata(dir_path) {
            Ok(meta) if meta.file_type().is_dir() => Ok(()),
            Ok(_) => Err(ExtractError::SymlinkDetected),
            Err(_) => Err(ExtractError::CreateDirFailed),
        };
    }

    Err(ExtractError::CreateDirFailed)
}

fn path_cstring(path: &Path) -> Option<std::ffi::CString> {
    std::ffi::CString::new(path.as_os_str().as_bytes()).ok()
}

fn copy_payload(
    gz: &mut GzipStream<File>,
    pending: &mut PendingFile,
    size: u64,
) -> Result<(), ExtractError> {
    let mut chunk = [0u8; COPY_CHUNK];
    let mut remaining = size;
    while remaining > 0 {
        let want = (remaining).min(COPY_CHUNK as u64) as usize;
        let got = gz
            .read_some(&mut chunk[..want])
            .map_err(|_| ExtractError::ReadFailed)?;
        if got == 0 {
            return Err(ExtractError::ReadFailed);
        }
        pending.write_all(&chunk[..got])?;
        remaining -= got as u64;
    }
    Ok(())
}

/// Destination file that removes itself unless committed.
struct PendingFile {
    file: Option<File>,
    path: PathBuf,
    committed: bool,
}

impl PendingFile {
    /// Removes any pre-existing entry of that name, then opens the
    /// destination with `O_WRONLY|O_CREAT|O_EXCL|O_NOFOLLOW|O_CLOEXEC`,
    /// mode 0o600. `EEXIST`/`ELOOP` mean something raced a link into place.
    fn create(path: &Path) -> Result<Self, ExtractError> {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(_) => return Err(ExtractError::WriteFileFailed),
        }

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(FILE_MODE)
            .custom_flags(libc::O_NOFOLLOW | libc::O_CLOEXEC)
            .open(path)
            .map_err(|e| match e.raw_os_error() {
                Some(libc::EEXIST) | Some(libc::ELOOP) => ExtractError::SymlinkDetected,
                _ => ExtractError::WriteFileFailed,
            })?;

        Ok(Self {
            file: Some(file),
            path: path.to_path_buf(),
            committed: false,
        })
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), ExtractError> {
        let Some(file) = self.file.as_mut() else {
            return Err(ExtractError::WriteFileFailed);
        };
        file.write_all(data).map_err(|_| ExtractError::WriteFileFailed)
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for PendingFile {
    fn drop(&mut self) {
        // Close before unlinking so no open handle survives to the removal.
        self.file.take();
        if !self.committed {
            let _ = fs::remove_file(&self.path);
        }
    }
}
