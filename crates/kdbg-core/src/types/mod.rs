//! # Types
//!
//! Architecture-level value types shared by every command: addresses and
//! register identifiers.

pub mod address;
pub mod registers;

// Re-export all public types
pub use address::{Address, PAGE_OFFSET_MASK, PAGE_SIZE};
pub use registers::{RegisterId, RegisterSet, RFLAGS_INTERRUPT_ENABLE};
