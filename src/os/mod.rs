//! Thin OS layer: descriptor ownership, interruption, child processes.

pub mod fd;
pub mod interrupt;
pub mod pipe;

pub use fd::OwnedFd;
pub use interrupt::{check_interrupted, install_signal_handlers, is_interrupted, CancelToken};
pub use pipe::ChildPipe;
