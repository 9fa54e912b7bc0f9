//! # Snapshot Host
//!
//! A halted target captured to files, replayed through the capability traits.
//!
//! - **Symbols**: the kernel ELF's symbol table, plus `name=address` overrides
//! - **Memory**: ELF core segments and raw physical images ([`MemoryImage`])
//! - **Registers**: a JSON object such as `{"rsp": "0xffff8000001fffd8"}`
//!
//! A snapshot never runs, so [`RegisterAccess::is_stopped`] is always `true`.
//! Register writes update the in-memory register set and are journaled in the
//! order they were made; the set can be written back with
//! [`SnapshotTarget::save_registers`].
//!
//! ## Example
//!
//! ```rust
//! use kdbg_core::platform::snapshot::{MemoryImage, SnapshotTarget};
//! use kdbg_core::target::{MemoryAccess, RegisterAccess, SymbolResolver};
//! use kdbg_core::types::{Address, RegisterId, RegisterSet};
//!
//! let target = SnapshotTarget::new()
//!     .with_memory(MemoryImage::new().with_region(Address::from(0x1000), vec![0x2a_u8; 8]))
//!     .with_symbol("answer", Address::from(0x1000))
//!     .with_registers(RegisterSet::new().with(RegisterId::Rsp, 0x1000));
//!
//! let answer = target.resolve_symbol("answer").unwrap();
//! assert_eq!(target.read_u32(answer).unwrap(), 0x2a2a_2a2a);
//! assert_eq!(target.read_register(RegisterId::Rsp).unwrap(), 0x1000);
//! ```

mod memory;
mod symbols;

use std::fs;
use std::path::Path;

pub use memory::MemoryImage;
pub use symbols::SymbolTable;
use tracing::debug;

use crate::error::{KdbgError, Result};
use crate::target::{MemoryAccess, RegisterAccess, SymbolResolver};
use crate::types::{Address, RegisterId, RegisterSet};

/// Halted target backed by captured memory, symbols and registers
#[derive(Debug, Clone, Default)]
pub struct SnapshotTarget
{
    memory: MemoryImage,
    symbols: SymbolTable,
    registers: RegisterSet,
    writes: Vec<(RegisterId, u64)>,
}

impl SnapshotTarget
{
    /// Create an empty snapshot
    pub fn new() -> Self
    {
        Self::default()
    }

    #[must_use]
    pub fn with_memory(mut self, memory: MemoryImage) -> Self
    {
        self.memory = memory;
        self
    }

    #[must_use]
    pub fn with_symbols(mut self, symbols: SymbolTable) -> Self
    {
        self.symbols = symbols;
        self
    }

    /// Add or override one symbol
    #[must_use]
    pub fn with_symbol(mut self, name: impl Into<String>, address: Address) -> Self
    {
        self.symbols.insert(name, address);
        self
    }

    #[must_use]
    pub fn with_registers(mut self, registers: RegisterSet) -> Self
    {
        self.registers = registers;
        self
    }

    /// Mutable access to the memory image, for loading further files
    pub fn memory_mut(&mut self) -> &mut MemoryImage
    {
        &mut self.memory
    }

    /// Mutable access to the symbol table, for applying overrides
    pub fn symbols_mut(&mut self) -> &mut SymbolTable
    {
        &mut self.symbols
    }

    /// Current register values, including any writes
    pub fn registers(&self) -> &RegisterSet
    {
        &self.registers
    }

    /// Every register write made so far, in order
    pub fn register_writes(&self) -> &[(RegisterId, u64)]
    {
        &self.writes
    }

    /// Load the register set from a JSON file
    pub fn load_registers(&mut self, path: &Path) -> Result<()>
    {
        let text = fs::read_to_string(path)?;
        self.registers = serde_json::from_str(&text)
            .map_err(|err| KdbgError::Snapshot(format!("{}: {err}", path.display())))?;
        debug!(path = %path.display(), "loaded registers");
        Ok(())
    }

    /// Write the current register set as JSON
    pub fn save_registers(&self, path: &Path) -> Result<()>
    {
        let text = serde_json::to_string_pretty(&self.registers)
            .map_err(|err| KdbgError::Snapshot(format!("cannot encode registers: {err}")))?;
        fs::write(path, text)?;
        debug!(path = %path.display(), "saved registers");
        Ok(())
    }
}

impl MemoryAccess for SnapshotTarget
{
    fn read_memory(&self, address: Address, len: usize) -> Result<Vec<u8>>
    {
        self.memory.read_memory(address, len)
    }
}

impl RegisterAccess for SnapshotTarget
{
    fn read_register(&self, id: RegisterId) -> Result<u64>
    {
        self.registers.get(id).ok_or_else(|| KdbgError::RegisterRead {
            register: id,
            details: "not present in the snapshot".to_string(),
        })
    }

    fn write_register(&mut self, id: RegisterId, value: u64) -> Result<()>
    {
        self.registers.set(id, value);
        self.writes.push((id, value));
        Ok(())
    }

    fn is_stopped(&self) -> bool
    {
        true
    }
}

impl SymbolResolver for SnapshotTarget
{
    fn resolve_symbol(&self, name: &str) -> Result<Address>
    {
        self.symbols.resolve_symbol(name)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_missing_register_is_a_read_failure()
    {
        let err = SnapshotTarget::new().read_register(RegisterId::Cr3).unwrap_err();
        assert!(matches!(err, KdbgError::RegisterRead { register: RegisterId::Cr3, .. }));
    }

    #[test]
    fn test_writes_are_journaled()
    {
        let mut target = SnapshotTarget::new();
        target.write_register(RegisterId::Rip, 1).unwrap();
        target.write_register(RegisterId::Rsp, 2).unwrap();
        assert_eq!(target.register_writes(), &[(RegisterId::Rip, 1), (RegisterId::Rsp, 2)]);
        assert_eq!(target.registers().get(RegisterId::Rsp), Some(2));
    }
}
