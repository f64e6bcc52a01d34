//! Coordination service living inside the current process.
//!
//! Every [`MemorySession`] obtained from the same [`MemoryCoordinator`] shares one
//! tree, so several participants of a match can run side by side in tests or in a
//! single-process demo. Sessions can be expired on demand to simulate a crashed
//! participant.

mod service;

pub use service::{MemoryCoordinator, MemorySession};
