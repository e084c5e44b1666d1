//! Hardened tgz (gzip + POSIX ustar) extraction.
//!
//! # Scope
//! This module materializes regular files and directories from a compressed
//! archive while actively resisting path traversal, link planting, and
//! resource-exhaustion attacks. It is an extractor only; nothing here
//! creates archives.
//!
//! # Design Notes
//! - `path` and `header` are pure helpers; all filesystem effects live in
//!   `extract`.
//! - Entries are processed strictly in archive order; there is no
//!   parallelism between entries.

pub mod extract;
pub mod gzip;
pub mod header;
pub mod path;

pub use extract::{extract, ExtractError};
pub use header::{EntryKind, HeaderView, TAR_BLOCK_LEN};
pub use path::sanitize_entry_path;
