//! Lexical sanitization of untrusted archive entry paths.
//!
//! # Invariants
//! - Decisions are purely lexical; the filesystem is never consulted. The
//!   `O_NOFOLLOW` at file-open time is the second line of defense.
//! - An accepted path is the join of `base_dir` with the validated
//!   components, strictly under `base_dir`.
//!
//! # Algorithm
//! - Screen the whole candidate: length, byte ranges, known-dangerous
//!   substrings and prefixes, shell metacharacters.
//! - Split on `/` and validate every component against a conservative
//!   filename charset, a depth cap, and dot rules.
//! - Re-check containment on the joined result.

use std::path::{Component, Path, PathBuf};

use memchr::memmem;

use crate::config::{TGZ_MAX_NAME_LENGTH, TGZ_MAX_PATH_DEPTH, TGZ_MAX_TOTAL_PATH_LENGTH};

const BANNED_SUBSTRINGS: [&[u8]; 5] = [b"../", b"..\\", b"//", b"\\\\", b":\\"];
const SHELL_METACHARACTERS: [u8; 5] = [b';', b'&', b'$', b'`', b'|'];

/// Validates `candidate` and resolves it under `base_dir`, or rejects it.
///
/// `base_dir` is caller-provided and trusted; `candidate` comes from an
/// archive header and is not.
pub fn sanitize_entry_path(base_dir: &Path, candidate: &str) -> Option<PathBuf> {
    if candidate.is_empty() || candidate.len() > TGZ_MAX_TOTAL_PATH_LENGTH {
        return None;
    }

    let bytes = candidate.as_bytes();
    for &b in bytes {
        if b >= 0x80 || (b < 0x20 && b != b'\t') {
            return None;
        }
    }

    if BANNED_SUBSTRINGS
        .iter()
        .any(|needle| memmem::find(bytes, needle).is_some())
    {
        return None;
    }
    if matches!(bytes[0], b'/' | b'\\' | b'~') {
        return None;
    }
    if bytes.iter().any(|b| SHELL_METACHARACTERS.contains(b)) {
        return None;
    }

    let mut result = base_dir.to_path_buf();
    let mut depth: u32 = 0;
    for component in candidate.split('/') {
        depth += 1;
        if depth > TGZ_MAX_PATH_DEPTH {
            return None;
        }
        if !is_safe_filename(component) {
            return None;
        }
        result.push(component);
    }

    // Lexical containment re-check on the joined result.
    let relative = result.strip_prefix(base_dir).ok()?;
    if relative.as_os_str().is_empty() || relative.is_absolute() {
        return None;
    }
    if !relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        return None;
    }

    Some(result)
}

/// Conservative single-component check: bounded length, no dot tricks, and
/// a fixed allowlisted charset.
pub fn is_safe_filename(name: &str) -> bool {
    if name.is_empty() || name.len() > TGZ_MAX_NAME_LENGTH {
        return false;
    }
    if name == "." || name == ".." {
        return false;
    }
    if name.starts_with('.') || name.ends_with('.') || name.contains("..") {
        return false;
    }
    name.bytes().all(is_safe_filename_byte)
}

#[inline]
fn is_safe_filename_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b' ')
}
