//! Kernel symbol table loaded from the kernel executable.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use object::{Object, ObjectSymbol, SymbolKind};
use tracing::debug;

use crate::error::{KdbgError, Result};
use crate::target::SymbolResolver;
use crate::types::Address;

/// Name to address map for kernel globals
#[derive(Debug, Clone, Default)]
pub struct SymbolTable
{
    symbols: HashMap<String, Address>,
}

impl SymbolTable
{
    /// Create an empty table
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Read the symbol table of an ELF kernel image
    ///
    /// Both `.symtab` and `.dynsym` entries are taken. Unnamed symbols, section
    /// and file symbols, and symbols at address zero are skipped. When a name
    /// occurs more than once the first definition wins.
    pub fn from_elf(path: &Path) -> Result<Self>
    {
        let bytes = fs::read(path)?;
        Self::from_elf_bytes(&bytes).map_err(|err| match err {
            KdbgError::Snapshot(details) => KdbgError::Snapshot(format!("{}: {details}", path.display())),
            other => other,
        })
    }

    /// Parse an in-memory ELF image
    pub fn from_elf_bytes(bytes: &[u8]) -> Result<Self>
    {
        let file = object::File::parse(bytes).map_err(|err| KdbgError::Snapshot(err.to_string()))?;

        let mut table = Self::new();
        for symbol in file.symbols().chain(file.dynamic_symbols()) {
            if matches!(symbol.kind(), SymbolKind::Section | SymbolKind::File) || symbol.address() == 0 {
                continue;
            }
            let Ok(name) = symbol.name() else { continue };
            if name.is_empty() {
                continue;
            }
            table
                .symbols
                .entry(name.to_string())
                .or_insert_with(|| Address::from(symbol.address()));
        }

        debug!(count = table.len(), "loaded kernel symbols");
        Ok(table)
    }

    /// Add or replace a symbol
    pub fn insert(&mut self, name: impl Into<String>, address: Address) -> Option<Address>
    {
        self.symbols.insert(name.into(), address)
    }

    /// Builder-style [`SymbolTable::insert`]
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, address: Address) -> Self
    {
        self.insert(name, address);
        self
    }

    pub fn len(&self) -> usize
    {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.symbols.is_empty()
    }
}

impl SymbolResolver for SymbolTable
{
    fn resolve_symbol(&self, name: &str) -> Result<Address>
    {
        self.symbols
            .get(name)
            .copied()
            .ok_or_else(|| KdbgError::SymbolNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_override_replaces_symbol()
    {
        let mut table = SymbolTable::new().with("kh_base_addr", Address::from(0x1000));
        assert_eq!(table.insert("kh_base_addr", Address::from(0x2000)), Some(Address::from(0x1000)));
        assert_eq!(table.resolve_symbol("kh_base_addr").unwrap(), Address::from(0x2000));
    }

    #[test]
    fn test_missing_symbol()
    {
        let err = SymbolTable::new().resolve_symbol("process_queue").unwrap_err();
        assert!(matches!(err, KdbgError::SymbolNotFound(name) if name == "process_queue"));
    }

    #[test]
    fn test_garbage_is_not_an_elf()
    {
        assert!(matches!(
            SymbolTable::from_elf_bytes(b"not an elf"),
            Err(KdbgError::Snapshot(_))
        ));
    }
}
