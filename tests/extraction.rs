//! End-to-end extraction scenarios against the public API.
//!
//! # Scope
//! Archives are synthesized in-process (gzip over hand-built ustar blocks)
//! and extracted into temp directories; assertions cover containment,
//! contents, and the documented failure modes.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use hostbench::archive::{extract, ExtractError, TAR_BLOCK_LEN};
use tempfile::TempDir;

fn build_header(name: &str, size: u64, typeflag: u8) -> [u8; TAR_BLOCK_LEN] {
    let mut block = [0u8; TAR_BLOCK_LEN];
    let name_bytes = name.as_bytes();
    let take = name_bytes.len().min(100);
    block[..take].copy_from_slice(&name_bytes[..take]);
    block[100..108].copy_from_slice(b"0000644\0");
    block[108..116].copy_from_slice(b"0000000\0");
    block[116..124].copy_from_slice(b"0000000\0");
    let mut size_field = [b'0'; 11];
    let mut v = size;
    for slot in size_field.iter_mut().rev() {
        *slot = b'0' + (v & 7) as u8;
        v >>= 3;
    }
    block[124..135].copy_from_slice(&size_field);
    block[136..148].copy_from_slice(b"00000000000\0");
    block[148..156].fill(b' ');
    block[156] = typeflag;
    block[257..263].copy_from_slice(b"ustar\0");
    block[263..265].copy_from_slice(b"00");
    let sum: u64 = block.iter().map(|&b| u64::from(b)).sum();
    block[148..156].copy_from_slice(format!("{sum:06o}\0 ").as_bytes());
    block
}

fn pad_len(size: u64) -> usize {
    ((TAR_BLOCK_LEN as u64 - (size % TAR_BLOCK_LEN as u64)) % TAR_BLOCK_LEN as u64) as usize
}

struct ArchiveBuilder {
    raw: Vec<u8>,
}

impl ArchiveBuilder {
    fn new() -> Self {
        Self { raw: Vec::new() }
    }

    fn entry(mut self, name: &str, typeflag: u8, payload: &[u8]) -> Self {
        self.raw
            .extend_from_slice(&build_header(name, payload.len() as u64, typeflag));
        self.raw.extend_from_slice(payload);
        self.raw.extend_from_slice(&vec![0u8; pad_len(payload.len() as u64)]);
        self
    }

    fn write_tgz(mut self, path: &Path) {
        self.raw.extend_from_slice(&[0u8; TAR_BLOCK_LEN]);
        self.raw.extend_from_slice(&[0u8; TAR_BLOCK_LEN]);
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&self.raw).unwrap();
        fs::write(path, enc.finish().unwrap()).unwrap();
    }
}

fn workspace() -> (TempDir, PathBuf, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let tgz = tmp.path().join("input.tgz");
    let out = tmp.path().join("out");
    fs::create_dir(&out).unwrap();
    (tmp, tgz, out)
}

// Deterministic pseudo-random payload; the exact bytes only need to be
// reproducible for the comparison after extraction.
fn noise(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 24) as u8
        })
        .collect()
}

#[test]
fn safe_round_trip_three_files() {
    let (_tmp, tgz, out) = workspace();
    ArchiveBuilder::new()
        .entry("d/", b'5', b"")
        .entry("d/f1", b'0', b"a\n")
        .entry("d/f2", b'0', b"bb\n")
        .entry("d/f3", b'0', b"ccc\n")
        .write_tgz(&tgz);

    extract(&tgz, &out).unwrap();

    assert_eq!(fs::read(out.join("d/f1")).unwrap(), b"a\n");
    assert_eq!(fs::read(out.join("d/f2")).unwrap(), b"bb\n");
    assert_eq!(fs::read(out.join("d/f3")).unwrap(), b"ccc\n");
    assert_eq!(fs::read_dir(out.join("d")).unwrap().count(), 3);
    assert_eq!(fs::read_dir(&out).unwrap().count(), 1);
}

#[test]
fn random_payload_survives_the_round_trip() {
    let (_tmp, tgz, out) = workspace();
    let payload = noise(1024, 0xBEEF);
    ArchiveBuilder::new()
        .entry("a/", b'5', b"")
        .entry("a/b", b'0', &payload)
        .write_tgz(&tgz);

    extract(&tgz, &out).unwrap();
    assert_eq!(fs::read(out.join("a/b")).unwrap(), payload);
}

#[test]
fn traversal_never_escapes_dest() {
    let (tmp, tgz, out) = workspace();
    ArchiveBuilder::new()
        .entry("../etc/evil", b'0', b"x")
        .write_tgz(&tgz);

    assert_eq!(extract(&tgz, &out), Err(ExtractError::PathTraversalDetected));

    assert!(!out.join("evil").exists());
    assert!(!tmp.path().join("evil").exists());
    assert!(!tmp.path().join("etc").exists());
    assert!(fs::read_dir(&out).unwrap().next().is_none());
}

#[test]
fn symlink_entry_creates_nothing() {
    let (_tmp, tgz, out) = workspace();
    ArchiveBuilder::new()
        .entry("link", b'2', b"")
        .write_tgz(&tgz);

    assert_eq!(extract(&tgz, &out), Err(ExtractError::SymlinkDetected));
    assert!(fs::read_dir(&out).unwrap().next().is_none());
}

#[test]
fn odd_payload_padding_is_skipped_correctly() {
    // 513 bytes leaves 511 bytes of ustar padding before the next header.
    let (_tmp, tgz, out) = workspace();
    let payload = noise(513, 7);
    ArchiveBuilder::new()
        .entry("odd.bin", b'0', &payload)
        .entry("next.txt", b'0', b"still aligned")
        .write_tgz(&tgz);

    extract(&tgz, &out).unwrap();
    assert_eq!(fs::read(out.join("odd.bin")).unwrap(), payload);
    assert_eq!(fs::read(out.join("next.txt")).unwrap(), b"still aligned");
}

#[test]
fn re_extraction_over_the_same_destination_succeeds() {
    let (_tmp, tgz, out) = workspace();
    ArchiveBuilder::new()
        .entry("d/", b'5', b"")
        .entry("d/file", b'0', b"first")
        .write_tgz(&tgz);
    extract(&tgz, &out).unwrap();

    let tgz2 = out.parent().unwrap().join("second.tgz");
    ArchiveBuilder::new()
        .entry("d/", b'5', b"")
        .entry("d/file", b'0', b"second")
        .write_tgz(&tgz2);
    extract(&tgz2, &out).unwrap();

    assert_eq!(fs::read(out.join("d/file")).unwrap(), b"second");
}

#[test]
fn nested_depth_at_limit_extracts() {
    let (_tmp, tgz, out) = workspace();
    let deep = vec!["d"; 20].join("/");
    ArchiveBuilder::new()
        .entry(&deep, b'0', b"bottom")
        .write_tgz(&tgz);

    extract(&tgz, &out).unwrap();
    assert_eq!(fs::read(out.join(&deep)).unwrap(), b"bottom");
}

#[test]
fn nested_depth_over_limit_is_traversal() {
    let (_tmp, tgz, out) = workspace();
    let deep = vec!["d"; 21].join("/");
    ArchiveBuilder::new()
        .entry(&deep, b'0', b"bottom")
        .write_tgz(&tgz);

    assert_eq!(extract(&tgz, &out), Err(ExtractError::PathTraversalDetected));
}

#[test]
fn garbage_input_is_not_an_archive() {
    let (_tmp, tgz, out) = workspace();
    fs::write(&tgz, b"this is not gzip").unwrap();
    assert_eq!(extract(&tgz, &out), Err(ExtractError::ReadFailed));
}
