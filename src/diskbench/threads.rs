//! Threaded fallback engine for the disk benchmark.
//!
//! # Invariants
//! - Mirrors the io_uring contract: at most `queue_depth` requests in
//!   flight, explicit read-slot ownership, drain before any error return.
//! - Requests run as scoped threads in batches; a batch is always joined
//!   completely before the driver acts on its first error.

use std::io;
use std::sync::Mutex;
use std::thread;
use std::time::Instant;

use crate::diskbench::{errno_message, IoPhase, PhaseDir, INTERRUPTED_MSG, TIMED_OUT_MSG};
use crate::os::interrupt::{stop_requested, CancelToken};
use crate::util::aligned::AlignedBuf;

/// Slot value for writes, which share one immutable buffer.
const SLOT_NONE: usize = usize::MAX;

pub(crate) fn run_threaded_phase(
    phase: &IoPhase,
    write_buf: Option<&AlignedBuf>,
    read_bufs: &mut [AlignedBuf],
    cancel: &CancelToken,
    progress: Option<&dyn Fn(u64, u64, &str)>,
) -> Result<(), String> {
    let depth = phase.queue_depth.max(1) as usize;
    let write_data: Option<&[u8]> = write_buf.map(AlignedBuf::as_slice);

    // Each read request locks exactly the slot it popped, so the mutexes
    // are never contended; they exist to hand `&mut` across the scope.
    let slot_bufs: Vec<Mutex<&mut [u8]>> = read_bufs
        .iter_mut()
        .map(|buf| Mutex::new(buf.as_mut_slice()))
        .collect();
    let mut free_slots: Vec<usize> = (0..slot_bufs.len()).collect();

    let mut completed: u64 = 0;
    let mut next_block: u64 = 0;

    thread::scope(|scope| {
        while next_block < phase.total_blocks {
            if stop_requested(cancel) {
                return Err(INTERRUPTED_MSG.to_string());
            }
            if Instant::now() > phase.deadline {
                return Err(TIMED_OUT_MSG.to_string());
            }

            let mut batch = Vec::with_capacity(depth);
            while next_block < phase.total_blocks && batch.len() < depth {
                let block_idx = next_block;
                next_block += 1;
                let slot = match phase.dir {
                    PhaseDir::Write => SLOT_NONE,
                    PhaseDir::Read => free_slots.pop().expect("read slot pool exhausted"),
                };
                let slot_bufs = &slot_bufs;
                let handle = scope.spawn(move || {
                    run_request(phase, block_idx, slot, write_data, slot_bufs, cancel)
                });
                batch.push((slot, handle));
            }

            // Join the whole batch before reacting: an early return here
            // would leave threads writing into buffers we are about to drop.
            let mut first_error: Option<String> = None;
            for (slot, handle) in batch {
                let outcome = handle
                    .join()
                    .unwrap_or_else(|_| Err("I/O worker panicked".to_string()));
                if slot != SLOT_NONE {
                    free_slots.push(slot);
                }
                match outcome {
                    Ok(()) => {
                        completed += 1;
                        if let Some(cb) = progress {
                            if completed % 2 == 0 {
                                cb(completed, phase.total_blocks, phase.label);
                            }
                        }
                    }
                    Err(err) => {
                        if first_error.is_none() {
                            first_error = Some(err);
                        }
                    }
                }
            }
            if let Some(err) = first_error {
                return Err(err);
            }
        }
        Ok(())
    })
}

fn run_request(
    phase: &IoPhase,
    block_idx: u64,
    slot: usize,
    write_data: Option<&[u8]>,
    slot_bufs: &[Mutex<&mut [u8]>],
    cancel: &CancelToken,
) -> Result<(), String> {
    if stop_requested(cancel) {
        return Err(INTERRUPTED_MSG.to_string());
    }

    let offset = (block_idx * phase.block_size as u64) as libc::off_t;
    let chunk = phase.chunk_len(block_idx);

    match phase.dir {
        PhaseDir::Write => {
            let data = write_data.expect("write phase without a write buffer");
            let written = loop {
                let rc = unsafe {
                    libc::pwrite(phase.fd, data.as_ptr().cast(), chunk, offset)
                };
                if rc >= 0 {
                    break rc;
                }
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::Interrupted {
                    return Err(format!(
                        "Benchmark failed: {}",
                        errno_message(err.raw_os_error().unwrap_or(0), "write")
                    ));
                }
            };
            if written as usize != chunk {
                return Err(format!(
                    "Benchmark failed: Partial write (expected {chunk} bytes, got {written})"
                ));
            }
        }
        PhaseDir::Read => {
            let mut guard = slot_bufs[slot]
                .lock()
                .map_err(|_| "read slot lock poisoned".to_string())?;
            let buf: &mut [u8] = &mut guard;
            let read = loop {
                let rc = unsafe {
                    libc::pread(phase.fd, buf.as_mut_ptr().cast(), chunk, offset)
                };
                if rc >= 0 {
                    break rc;
                }
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::Interrupted {
                    return Err(format!(
                        "Benchmark failed: {}",
                        errno_message(err.raw_os_error().unwrap_or(0), "read")
                    ));
                }
            };
            if read == 0 {
                return Err("Benchmark failed: Unexpected EOF during read".to_string());
            }
            if read as usize != chunk {
                return Err(format!(
                    "Benchmark failed: Partial read (expected {chunk} bytes, got {read})"
                ));
            }
        }
    }

    if Instant::now() > phase.deadline {
        return Err(TIMED_OUT_MSG.to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::aligned::fill_incompressible;
    use std::fs::OpenOptions;
    use std::os::unix::io::AsRawFd;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn sequential_submissions_with_depth_one() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("seq");
        let block = 8 * 1024usize;
        let blocks = 6u64;
        let total = blocks * block as u64;

        let mut write_buf = AlignedBuf::zeroed(block, 4096);
        fill_incompressible(write_buf.as_mut_slice());
        let cancel = CancelToken::new();

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .unwrap();
        let phase = IoPhase {
            dir: PhaseDir::Write,
            fd: file.as_raw_fd(),
            total_blocks: blocks,
            total_bytes: total,
            block_size: block,
            queue_depth: 1,
            deadline: Instant::now() + Duration::from_secs(30),
            label: "seq write",
        };
        run_threaded_phase(&phase, Some(&write_buf), &mut [], &cancel, None).unwrap();
        drop(file);

        let written = std::fs::read(&path).unwrap();
        assert_eq!(written.len() as u64, total);
        assert_eq!(&written[..block], write_buf.as_slice());
    }

    #[test]
    fn read_phase_validates_full_transfers() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("short");
        let block = 4096usize;
        // File holds 2 blocks but the phase claims 3: the pread of the
        // missing block observes EOF.
        std::fs::write(&path, vec![3u8; 2 * block]).unwrap();
        let file = OpenOptions::new().read(true).open(&path).unwrap();
        let cancel = CancelToken::new();
        let mut read_bufs: Vec<AlignedBuf> =
            (0..2).map(|_| AlignedBuf::zeroed(block, 4096)).collect();

        let phase = IoPhase {
            dir: PhaseDir::Read,
            fd: file.as_raw_fd(),
            total_blocks: 3,
            total_bytes: 3 * block as u64,
            block_size: block,
            queue_depth: 2,
            deadline: Instant::now() + Duration::from_secs(30),
            label: "short read",
        };
        let err = run_threaded_phase(&phase, None, &mut read_bufs, &cancel, None).unwrap_err();
        assert!(err.contains("EOF"), "{err}");
    }

    #[test]
    fn expired_deadline_times_out() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("late");
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .unwrap();
        let write_buf = AlignedBuf::zeroed(4096, 4096);
        let cancel = CancelToken::new();
        let phase = IoPhase {
            dir: PhaseDir::Write,
            fd: file.as_raw_fd(),
            total_blocks: 2,
            total_bytes: 2 * 4096,
            block_size: 4096,
            queue_depth: 1,
            deadline: Instant::now() - Duration::from_secs(1),
            label: "late",
        };
        let err =
            run_threaded_phase(&phase, Some(&write_buf), &mut [], &cancel, None).unwrap_err();
        assert_eq!(err, TIMED_OUT_MSG);
    }
}
