//! # Host Implementations
//!
//! Concrete providers of the [`crate::target`] capabilities.
//!
//! - **snapshot**: a halted target captured to files (kernel ELF for symbols,
//!   an ELF core or raw physical image for memory, a JSON register set)
//!
//! Live hosts (a GDB remote stub, a hypervisor debug port) plug in the same way:
//! implement `MemoryAccess`, `RegisterAccess` and `SymbolResolver`.

pub mod snapshot;
