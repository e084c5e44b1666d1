//! io_uring engine for the disk benchmark.
//!
//! # Invariants
//! - `submitted - completed <= queue_depth` at all times.
//! - Read completions land in explicit slots from a free pool, never in a
//!   slot derived from the submission index; completions may reorder.
//! - Every early return drains in-flight requests first, so no kernel read
//!   or write outlives the buffers it targets.

use std::io;

use io_uring::{opcode, types, IoUring};

use crate::diskbench::{errno_message, IoPhase, PhaseDir, INTERRUPTED_MSG, TIMED_OUT_MSG};
use crate::os::interrupt::{stop_requested, CancelToken};
use crate::util::aligned::AlignedBuf;

/// Marker for write completions, which share one buffer and own no slot.
const SLOT_NONE: u32 = u32::MAX;

pub(crate) struct UringEngine {
    ring: IoUring,
}

impl UringEngine {
    /// Sets up a ring sized to the queue depth. Failure here means the
    /// platform lacks io_uring; callers fall back to threaded I/O.
    pub(crate) fn new(queue_depth: u32) -> io::Result<Self> {
        let entries = queue_depth.max(1).next_power_of_two();
        Ok(Self {
            ring: IoUring::new(entries)?,
        })
    }

    pub(crate) fn run(
        &mut self,
        phase: &IoPhase,
        write_buf: Option<&AlignedBuf>,
        read_bufs: &mut [AlignedBuf],
        cancel: &CancelToken,
        progress: Option<&dyn Fn(u64, u64, &str)>,
    ) -> Result<(), String> {
        let depth = u64::from(phase.queue_depth.max(1));
        let mut submitted: u64 = 0;
        let mut completed: u64 = 0;
        let mut free_slots: Vec<usize> = (0..read_bufs.len()).collect();

        debug_assert!(
            phase.dir == PhaseDir::Write || read_bufs.len() as u64 >= depth,
            "read phase needs one buffer per in-flight request"
        );

        while completed < phase.total_blocks {
            while submitted < phase.total_blocks && submitted - completed < depth {
                if stop_requested(cancel) {
                    return self.fail(submitted - completed, INTERRUPTED_MSG.to_string());
                }

                let offset = submitted * phase.block_size as u64;
                let len = phase.chunk_len(submitted) as u32;

                let (slot, entry) = match phase.dir {
                    PhaseDir::Write => {
                        let buf = write_buf.expect("write phase without a write buffer");
                        let sqe = opcode::Write::new(types::Fd(phase.fd), buf.as_ptr(), len)
                            .offset(offset)
                            .build()
                            .user_data(pack_user_data(SLOT_NONE, len));
                        (SLOT_NONE, sqe)
                    }
                    PhaseDir::Read => {
                        let Some(slot) = free_slots.pop() else {
                            break;
                        };
                        let sqe = opcode::Read::new(
                            types::Fd(phase.fd),
                            read_bufs[slot].as_mut_ptr(),
                            len,
                        )
                        .offset(offset)
                        .build()
                        .user_data(pack_user_data(slot as u32, len));
                        (slot as u32, sqe)
                    }
                };

                let pushed = unsafe { self.ring.submission().push(&entry).is_ok() };
                if !pushed {
                    if slot != SLOT_NONE {
                        free_slots.push(slot as usize);
                    }
                    break;
                }
                submitted += 1;
            }

            if let Err(err) = self.ring.submit_and_wait(1) {
                return self.fail(
                    submitted - completed,
                    format!("io_uring wait failed: {err}"),
                );
            }

            loop {
                let cqe = {
                    let mut cq = self.ring.completion();
                    cq.next()
                };
                let Some(cqe) = cqe else { break };

                let (slot, expected_len) = unpack_user_data(cqe.user_data());
                if slot != SLOT_NONE {
                    free_slots.push(slot as usize);
                }
                completed += 1;

                let result = cqe.result();
                if result < 0 {
                    return self.fail(
                        submitted - completed,
                        format!(
                            "Benchmark failed: {}",
                            errno_message(-result, phase.dir.op_name())
                        ),
                    );
                }
                if result as u32 != expected_len {
                    return self.fail(
                        submitted - completed,
                        format!(
                            "Benchmark failed: Partial {} (expected {expected_len} bytes, got {result})",
                            phase.dir.op_name()
                        ),
                    );
                }

                if let Some(cb) = progress {
                    if completed % 2 == 0 {
                        cb(completed, phase.total_blocks, phase.label);
                    }
                }

                if std::time::Instant::now() > phase.deadline {
                    return self.fail(submitted - completed, TIMED_OUT_MSG.to_string());
                }
                if stop_requested(cancel) {
                    return self.fail(submitted - completed, INTERRUPTED_MSG.to_string());
                }
            }
        }

        debug_assert_eq!(submitted, completed);
        Ok(())
    }

    fn fail(&mut self, in_flight: u64, message: String) -> Result<(), String> {
        self.drain(in_flight);
        Err(message)
    }

    /// Collects (and discards) the given number of outstanding completions.
    fn drain(&mut self, mut in_flight: u64) {
        while in_flight > 0 {
            if self.ring.submit_and_wait(1).is_err() {
                break;
            }
            loop {
                let cqe = {
                    let mut cq = self.ring.completion();
                    cq.next()
                };
                if cqe.is_none() {
                    break;
                }
                in_flight -= 1;
                if in_flight == 0 {
                    break;
                }
            }
        }
    }
}

#[inline]
fn pack_user_data(slot: u32, len: u32) -> u64 {
    (u64::from(slot) << 32) | u64::from(len)
}

#[inline]
fn unpack_user_data(data: u64) -> (u32, u32) {
    ((data >> 32) as u32, data as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::aligned::fill_incompressible;
    use std::fs::OpenOptions;
    use std::os::unix::io::AsRawFd;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn ring_available() -> bool {
        UringEngine::new(2).is_ok()
    }

    #[test]
    fn user_data_round_trip() {
        assert_eq!(unpack_user_data(pack_user_data(7, 4096)), (7, 4096));
        assert_eq!(
            unpack_user_data(pack_user_data(SLOT_NONE, u32::MAX)),
            (SLOT_NONE, u32::MAX)
        );
    }

    #[test]
    fn write_then_read_round_trip() {
        if !ring_available() {
            return;
        }
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("uring_io");
        let block = 64 * 1024usize;
        let blocks = 8u64;
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
            queue_depth: 4,
            deadline: Instant::now() + Duration::from_secs(30),
            label: "test write",
        };
        let mut engine = UringEngine::new(4).unwrap();
        engine.run(&phase, Some(&write_buf), &mut [], &cancel, None).unwrap();
        drop(file);

        let mut read_bufs: Vec<AlignedBuf> =
            (0..4).map(|_| AlignedBuf::zeroed(block, 4096)).collect();
        let file = OpenOptions::new().read(true).open(&path).unwrap();
        let phase = IoPhase {
            dir: PhaseDir::Read,
            fd: file.as_raw_fd(),
            total_blocks: blocks,
            total_bytes: total,
            block_size: block,
            queue_depth: 4,
            deadline: Instant::now() + Duration::from_secs(30),
            label: "test read",
        };
        let mut engine = UringEngine::new(4).unwrap();
        engine
            .run(&phase, None, &mut read_bufs, &cancel, None)
            .unwrap();

        // Every slot that saw a completion holds the written pattern.
        let expected = write_buf.as_slice();
        assert!(read_bufs.iter().any(|b| b.as_slice() == expected));
    }

    #[test]
    fn cancellation_drains_before_returning() {
        if !ring_available() {
            return;
        }
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cancelled");
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();

        let write_buf = AlignedBuf::zeroed(4096, 4096);
        let phase = IoPhase {
            dir: PhaseDir::Write,
            fd: file.as_raw_fd(),
            total_blocks: 4,
            total_bytes: 4 * 4096,
            block_size: 4096,
            queue_depth: 2,
            deadline: Instant::now() + Duration::from_secs(30),
            label: "cancel",
        };
        let mut engine = UringEngine::new(2).unwrap();
        let err = engine
            .run(&phase, Some(&write_buf), &mut [], &cancel, None)
            .unwrap_err();
        assert_eq!(err, INTERRUPTED_MSG);
    }
}
