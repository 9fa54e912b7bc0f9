//! Snapshot loading from command-line inputs.

use std::path::PathBuf;

use kdbg_core::platform::snapshot::{SnapshotTarget, SymbolTable};
use kdbg_core::types::address::parse_u64;
use kdbg_core::{Address, KdbgError, Result};
use kdbg_utils::{info, warn};

/// Raw physical memory image: `PATH@PHYS`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage
{
    pub path: PathBuf,
    pub physical: Address,
}

/// Symbol override: `NAME=ADDR`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolOverride
{
    pub name: String,
    pub address: Address,
}

/// Parse `PATH@PHYS` (the last `@` splits, so paths may contain one)
pub fn parse_raw_image(text: &str) -> Result<RawImage>
{
    let (path, physical) = text
        .rsplit_once('@')
        .ok_or_else(|| KdbgError::InvalidArgument(format!("expected PATH@PHYS, got {text:?}")))?;
    if path.is_empty() {
        return Err(KdbgError::InvalidArgument(format!("missing path in {text:?}")));
    }
    Ok(RawImage {
        path: PathBuf::from(path),
        physical: Address::from(parse_u64(physical)?),
    })
}

/// Parse `NAME=ADDR`
pub fn parse_symbol_override(text: &str) -> Result<SymbolOverride>
{
    let (name, address) = text
        .split_once('=')
        .ok_or_else(|| KdbgError::InvalidArgument(format!("expected NAME=ADDR, got {text:?}")))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(KdbgError::InvalidArgument(format!("missing symbol name in {text:?}")));
    }
    Ok(SymbolOverride {
        name: name.to_string(),
        address: Address::from(parse_u64(address)?),
    })
}

/// Files and overrides making up one snapshot
#[derive(Debug, Clone, Default)]
pub struct SnapshotSources
{
    pub kernel: Option<PathBuf>,
    pub cores: Vec<PathBuf>,
    pub raws: Vec<RawImage>,
    pub registers: Option<PathBuf>,
    pub symbols: Vec<SymbolOverride>,
}

impl SnapshotSources
{
    /// Load everything into a target
    ///
    /// Later memory sources shadow earlier ones; overrides win over ELF symbols.
    pub fn load(&self) -> Result<SnapshotTarget>
    {
        let mut target = SnapshotTarget::new();

        if let Some(kernel) = &self.kernel {
            let table = SymbolTable::from_elf(kernel)?;
            info!(kernel = %kernel.display(), symbols = table.len(), "loaded kernel symbols");
            target = target.with_symbols(table);
        }
        for symbol in &self.symbols {
            target.symbols_mut().insert(symbol.name.clone(), symbol.address);
        }

        for core in &self.cores {
            target.memory_mut().load_core(core)?;
            info!(core = %core.display(), "loaded core file");
        }
        for raw in &self.raws {
            target.memory_mut().load_raw(&raw.path, raw.physical)?;
            info!(image = %raw.path.display(), physical = %raw.physical, "loaded physical image");
        }
        if self.cores.is_empty() && self.raws.is_empty() {
            warn!("no memory image given; only register and address commands will work");
        }

        if let Some(registers) = &self.registers {
            target.load_registers(registers)?;
        }
        Ok(target)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_parse_raw_image()
    {
        let raw = parse_raw_image("dumps/ram@low.bin@0x100000").unwrap();
        assert_eq!(raw.path, PathBuf::from("dumps/ram@low.bin"));
        assert_eq!(raw.physical, Address::from(0x10_0000));
        assert!(parse_raw_image("ram.bin").is_err());
        assert!(parse_raw_image("@0x1000").is_err());
    }

    #[test]
    fn test_parse_symbol_override()
    {
        let symbol = parse_symbol_override("kh_base_addr=0xffffffff80105000").unwrap();
        assert_eq!(symbol.name, "kh_base_addr");
        assert_eq!(symbol.address, Address::from(0xffff_ffff_8010_5000));
        assert!(parse_symbol_override("kh_base_addr").is_err());
        assert!(parse_symbol_override("=0x10").is_err());
    }

    #[test]
    fn test_empty_sources_load()
    {
        let target = SnapshotSources::default().load().unwrap();
        assert!(target.register_writes().is_empty());
    }

    #[test]
    fn test_missing_core_file()
    {
        let sources = SnapshotSources {
            cores: vec![PathBuf::from("/nonexistent/kdbg-core.elf")],
            ..SnapshotSources::default()
        };
        assert!(matches!(sources.load(), Err(KdbgError::Io(_))));
    }
}
