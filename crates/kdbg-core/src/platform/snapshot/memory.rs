//! # Snapshot Memory
//!
//! Byte ranges captured from a halted target, addressable by target address.
//!
//! Two sources are supported:
//!
//! - **ELF core files** as written by QEMU's `dump-guest-memory`: every
//!   `PT_LOAD` segment is mapped at its virtual address and, through the direct
//!   map, at `DIRECT_MAP_BASE | p_paddr`.
//! - **Raw physical images**: a flat dump placed at a physical base, mapped at
//!   that physical address and through the direct map.
//!
//! Aliases share one buffer (`Arc<[u8]>`), so a 4 GiB image is held once no
//! matter how many windows expose it.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use object::elf::PT_LOAD;
use object::read::elf::{ElfFile64, ProgramHeader};
use object::Endianness;
use tracing::debug;

use crate::error::{KdbgError, Result};
use crate::relocate::relocate;
use crate::target::MemoryAccess;
use crate::types::Address;

#[derive(Clone)]
struct Region
{
    start: Address,
    data: Arc<[u8]>,
}

impl Region
{
    fn end(&self) -> u64
    {
        self.start.value().saturating_add(self.data.len() as u64)
    }

    fn contains(&self, address: u64) -> bool
    {
        self.start.value() <= address && address < self.end()
    }
}

/// Set of captured memory regions
#[derive(Clone, Default)]
pub struct MemoryImage
{
    regions: Vec<Region>,
}

impl std::fmt::Debug for MemoryImage
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_list()
            .entries(self.regions.iter().map(|region| (region.start, region.data.len())))
            .finish()
    }
}

impl MemoryImage
{
    /// Create an empty image
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Map `data` at `start`
    ///
    /// Later regions shadow earlier ones where they overlap.
    #[must_use]
    pub fn with_region(mut self, start: Address, data: impl Into<Arc<[u8]>>) -> Self
    {
        self.add_region(start, data.into());
        self
    }

    /// Map `data` at a physical address and at its direct-map alias
    #[must_use]
    pub fn with_physical(mut self, physical: Address, data: impl Into<Arc<[u8]>>) -> Self
    {
        self.add_physical(physical, data.into());
        self
    }

    /// Number of mapped regions (aliases count separately)
    pub fn region_count(&self) -> usize
    {
        self.regions.len()
    }

    fn add_region(&mut self, start: Address, data: Arc<[u8]>)
    {
        if data.is_empty() {
            return;
        }
        debug!(%start, len = data.len(), "mapped snapshot region");
        // Newest first so that lookups see shadowing regions before older ones.
        self.regions.insert(0, Region { start, data });
    }

    fn add_physical(&mut self, physical: Address, data: Arc<[u8]>)
    {
        let alias = relocate(physical.value());
        self.add_region(physical, Arc::clone(&data));
        if alias != physical {
            self.add_region(alias, data);
        }
    }

    /// Load a raw physical memory image placed at `physical`
    pub fn load_raw(&mut self, path: &Path, physical: Address) -> Result<()>
    {
        let bytes = fs::read(path)?;
        self.add_physical(physical, bytes.into());
        Ok(())
    }

    /// Load every `PT_LOAD` segment of an ELF core file
    ///
    /// ## Errors
    ///
    /// - `Io`: the file cannot be read
    /// - `Snapshot`: the file is not a 64-bit ELF or a segment lies outside it
    pub fn load_core(&mut self, path: &Path) -> Result<()>
    {
        let bytes = fs::read(path)?;
        let elf = ElfFile64::<Endianness>::parse(bytes.as_slice())
            .map_err(|err| KdbgError::Snapshot(format!("{}: {err}", path.display())))?;
        let endian = elf.endian();

        let mut loaded = 0usize;
        for header in elf.elf_program_headers() {
            if header.p_type(endian) != PT_LOAD {
                continue;
            }
            let data = header.data(endian, bytes.as_slice()).map_err(|_| {
                KdbgError::Snapshot(format!("{}: segment data outside the file", path.display()))
            })?;
            let data: Arc<[u8]> = Arc::from(data);
            let virtual_address = Address::from(header.p_vaddr(endian));
            let physical = Address::from(header.p_paddr(endian));

            self.add_region(virtual_address, Arc::clone(&data));
            let alias = relocate(physical.value());
            if alias != virtual_address {
                self.add_region(alias, data);
            }
            loaded += 1;
        }

        if loaded == 0 {
            return Err(KdbgError::Snapshot(format!("{}: no PT_LOAD segments", path.display())));
        }
        debug!(path = %path.display(), segments = loaded, "loaded core file");
        Ok(())
    }

    /// Region visible at `address`, and where its visibility ends
    ///
    /// A newer region starting inside the found one cuts it short.
    fn visible_at(&self, address: u64) -> Option<(&Region, u64)>
    {
        let index = self.regions.iter().position(|region| region.contains(address))?;
        let region = &self.regions[index];
        let limit = self.regions[..index]
            .iter()
            .map(|newer| newer.start.value())
            .filter(|&start| start > address)
            .fold(region.end(), u64::min);
        Some((region, limit))
    }
}

impl MemoryAccess for MemoryImage
{
    fn read_memory(&self, address: Address, len: usize) -> Result<Vec<u8>>
    {
        let fail = |details: String| KdbgError::MemoryRead { address, len, details };

        let end = address
            .value()
            .checked_add(len as u64)
            .ok_or_else(|| fail("range wraps around the address space".into()))?;

        let mut out = Vec::with_capacity(len);
        let mut cursor = address.value();
        while cursor < end {
            let (region, limit) = self
                .visible_at(cursor)
                .ok_or_else(|| fail(format!("{cursor:#x} is not in the snapshot")))?;
            let offset = (cursor - region.start.value()) as usize;
            let take = (end.min(limit) - cursor) as usize;
            out.extend_from_slice(&region.data[offset..offset + take]);
            cursor += take as u64;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_read_within_region()
    {
        let image = MemoryImage::new().with_region(Address::from(0x1000), vec![1u8, 2, 3, 4]);
        assert_eq!(image.read_memory(Address::from(0x1001), 2).unwrap(), vec![2, 3]);
    }

    #[test]
    fn test_read_spans_adjacent_regions()
    {
        let image = MemoryImage::new()
            .with_region(Address::from(0x1000), vec![1u8, 2])
            .with_region(Address::from(0x1002), vec![3u8, 4]);
        assert_eq!(image.read_memory(Address::from(0x1001), 3).unwrap(), vec![2, 3, 4]);
    }

    #[test]
    fn test_read_across_gap_fails()
    {
        let image = MemoryImage::new()
            .with_region(Address::from(0x1000), vec![1u8, 2])
            .with_region(Address::from(0x1003), vec![4u8]);
        let err = image.read_memory(Address::from(0x1000), 4).unwrap_err();
        assert!(err.is_access_failure());
    }

    #[test]
    fn test_physical_region_has_direct_map_alias()
    {
        let image = MemoryImage::new().with_physical(Address::from(0x2000), vec![0xaa_u8; 16]);
        assert_eq!(image.region_count(), 2);
        assert_eq!(image.read_u32(Address::from(0xfffffe0000002004)).unwrap(), 0xaaaa_aaaa);
        assert_eq!(image.read_u32(Address::from(0x2004)).unwrap(), 0xaaaa_aaaa);
    }

    #[test]
    fn test_newer_region_shadows_older()
    {
        let image = MemoryImage::new()
            .with_region(Address::from(0x1000), vec![0u8; 8])
            .with_region(Address::from(0x1004), vec![7u8; 4]);
        assert_eq!(image.read_memory(Address::from(0x1003), 2).unwrap(), vec![0, 7]);
    }
}
