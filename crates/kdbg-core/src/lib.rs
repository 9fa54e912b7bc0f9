//! # kdbg-core
//!
//! Decoders and walkers for the structures of a halted x86-64 kernel.
//!
//! This crate provides the introspection algorithms, including:
//! - Exception frame step-out with a fixed register restore order
//! - Paging structure decoding (PML4T, PDPT, PDT, PT)
//! - Kernel heap traversal with corruption detection
//! - Physical frame allocation-state lookup
//! - Direct-map relocation and interrupt-flag toggling
//! - Current process / thread lookup through the scheduler queues
//!
//! ## Hosts
//!
//! The core never talks to a debugger directly. Everything goes through the
//! capability traits in [`target`], implemented by a host:
//!
//! - **Snapshot**: memory, symbols and registers captured to files
//!   ([`platform::snapshot`])
//!
//! ## No unsafe code
//!
//! Every structure is decoded from byte buffers the host hands over; nothing
//! here touches another process directly.

pub mod command;
pub mod config;
pub mod error;
pub mod exception;
pub mod frames;
pub mod heap;
pub mod interrupts;
pub mod paging;
pub mod platform;
pub mod relocate;
pub mod sched;
pub mod target;
pub mod types;

pub use command::{Capability, Command, Report};
pub use config::KernelLayout;
// Re-export commonly used types
pub use error::{KdbgError, Result};
pub use target::{MemoryAccess, RegisterAccess, SymbolResolver, Target};
pub use types::{Address, RegisterId, RegisterSet};
