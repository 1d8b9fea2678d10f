//! Minicomputer emulator core: MITS Altair 8800 and the Interdata 16b
//! and 32b families.
//!
//! A single-threaded cooperative interpreter per machine: one logical
//! thread of control fetches and executes instructions, and every other
//! activity (device timing, DMA, console polling, clock ticks) is an
//! event on a shared queue, drained between instructions.
//!
//! # Architecture
//!
//! | Module              | Subsystem                                        |
//! |---------------------|--------------------------------------------------|
//! | `sched`             | discrete-event co-scheduler                      |
//! | `altair`            | 8080 CPU, 88-2SIO, 88-DISK, boot PROM            |
//! | `interdata`         | shared fabric: memory, interrupts, channels      |
//! | `interdata::cpu16`  | I3 / I4 / 7-16 / 8-16 / 8-16E interpreter        |
//! | `interdata::cpu32`  | 7/32 and 8/32 interpreter with the MAC           |
//! | `interdata::devices`| console, clocks, printer, tapes, disks, async    |
//!
//! The interactive monitor, terminal multiplexing, and host image
//! formats live outside the core; the embedder drives the systems
//! through `run`, examine/deposit, attach/detach, and the per-device
//! input/output queues.

pub mod altair;
pub mod interdata;
pub mod sched;

use thiserror::Error;

pub use altair::AltairSystem;
pub use interdata::cpu16::{Id16Model, Id16System};
pub use interdata::cpu32::{Id32Model, Id32System};

/// Why the interpreter loop came back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Instruction budget exhausted
    Complete,
    /// HALT instruction (8080)
    Halt,
    /// Breakpoint hit before execution
    Breakpoint,
    /// Illegal or unimplemented opcode with instruction stops enabled
    IllegalInstruction,
    /// Wait state with nothing left in the event queue
    Wait,
    /// Device signalled a hard I/O error with stop-on-error set
    IoError,
    /// Device number conflict found while building the dispatch tables
    DeviceConflict,
}

/// Configuration errors surfaced to the embedder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unsupported memory size {0:#X}")]
    BadMemorySize(u32),
    #[error("shrinking memory would discard non-zero contents")]
    TruncateNonZero,
    #[error("device number conflict at {0:#04X}")]
    DevNoConflict(u32),
}
