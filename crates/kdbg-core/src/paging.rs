//! # Page-Table Decoding
//!
//! Decodes one x86-64 paging structure page (PT, PDT, PDPT or PML4T) into the
//! list of its non-empty entries.
//!
//! Every level has the same shape: 512 little-endian 64-bit entries filling a
//! 4 KiB page. The decoder does not know or care which level it is looking at.
//!
//! ## Entry layout
//!
//! ```text
//!  63      52 51                    12 11  10  9  8 7 6 5 4 3 2 1 0
//! +----------+------------------------+------+---+-+-+-+-+-+-+-+-+-+
//! | ignored  | physical address       | avl  |COW|G|S|D|A|N|C|U|W|P|
//! +----------+------------------------+------+---+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! When `P` is clear the hardware ignores every other bit, so the standard
//! flags render as placeholders. The kernel still uses bit 9 (copy-on-write)
//! on non-present entries, so that marker is shown regardless.

use std::fmt;

use bitflags::bitflags;
use serde::Serialize;
use smallvec::SmallVec;
use tracing::debug;

use crate::error::{KdbgError, Result};
use crate::target::MemoryAccess;
use crate::types::{Address, PAGE_SIZE};

/// Number of entries in a paging structure page
pub const ENTRIES_PER_PAGE: usize = 512;

/// Size of one entry in bytes
pub const ENTRY_SIZE: usize = 8;

/// Bits 12..=51 of an entry: the physical frame address
pub const ENTRY_ADDRESS_MASK: u64 = 0x000f_ffff_ffff_f000;

bitflags! {
    /// Flag bits of a page-table entry
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PageFlags: u64
    {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const NO_CACHE = 1 << 4;
        const ACCESSED = 1 << 5;
        const DIRTY = 1 << 6;
        const PAGE_SIZE = 1 << 7;
        const GLOBAL = 1 << 8;
        /// Kernel-defined: duplicate the page on the next write
        const COPY_ON_WRITE = 1 << 9;
    }
}

/// Standard flags in display order, most significant first
const STANDARD_FLAGS: [(PageFlags, char); 9] = [
    (PageFlags::GLOBAL, 'G'),
    (PageFlags::PAGE_SIZE, 'S'),
    (PageFlags::DIRTY, 'D'),
    (PageFlags::ACCESSED, 'A'),
    (PageFlags::NO_CACHE, 'N'),
    (PageFlags::WRITE_THROUGH, 'C'),
    (PageFlags::USER, 'U'),
    (PageFlags::WRITABLE, 'W'),
    (PageFlags::PRESENT, 'P'),
];

/// Kernel-defined flags, shown as separate markers
const CUSTOM_FLAGS: [(PageFlags, &str); 1] = [(PageFlags::COPY_ON_WRITE, "COW")];

/// Raw 64-bit page-table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageTableEntry(u64);

impl PageTableEntry
{
    /// Wrap a raw entry value
    pub const fn new(raw: u64) -> Self
    {
        Self(raw)
    }

    /// Raw entry value
    pub const fn raw(self) -> u64
    {
        self.0
    }

    /// Whether the entry is all zeroes (unused slot)
    pub const fn is_empty(self) -> bool
    {
        self.0 == 0
    }

    /// Whether the present bit is set
    pub const fn is_present(self) -> bool
    {
        self.0 & PageFlags::PRESENT.bits() != 0
    }

    /// Flag bits, with unknown bits dropped
    pub const fn flags(self) -> PageFlags
    {
        PageFlags::from_bits_truncate(self.0)
    }

    /// Page-aligned physical address held in bits 12..=51
    pub const fn physical_base(self) -> Address
    {
        Address::new(self.0 & ENTRY_ADDRESS_MASK)
    }

    /// Nine-character flag string in `GSDANCUWP` order
    ///
    /// ```rust
    /// use kdbg_core::paging::PageTableEntry;
    ///
    /// assert_eq!(PageTableEntry::new(0x23).flag_string(), "...A...WP");
    /// assert_eq!(PageTableEntry::new(0x22).flag_string(), ".........");
    /// ```
    pub fn flag_string(self) -> String
    {
        let flags = self.flags();
        STANDARD_FLAGS
            .iter()
            .map(|&(flag, letter)| if self.is_present() && flags.contains(flag) { letter } else { '.' })
            .collect()
    }

    /// Kernel-defined flag markers, independent of the present bit
    pub fn markers(self) -> SmallVec<[&'static str; 1]>
    {
        let flags = self.flags();
        CUSTOM_FLAGS
            .iter()
            .filter(|(flag, _)| flags.contains(*flag))
            .map(|&(_, marker)| marker)
            .collect()
    }
}

/// One reported slot of a decoded page-table page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedEntry
{
    /// Slot number (0..512); equals the virtual-address index at this level
    pub index: usize,
    /// Raw entry value
    #[serde(serialize_with = "serialize_hex")]
    pub raw: u64,
    /// Page-aligned physical address
    pub physical_base: Address,
    /// Nine-character flag string
    pub flags: String,
    /// Kernel-defined flag markers (`COW`)
    pub markers: SmallVec<[&'static str; 1]>,
}

impl DecodedEntry
{
    /// Decode a non-empty entry found at `index`
    pub fn new(index: usize, entry: PageTableEntry) -> Self
    {
        Self {
            index,
            raw: entry.raw(),
            physical_base: entry.physical_base(),
            flags: entry.flag_string(),
            markers: entry.markers(),
        }
    }
}

impl fmt::Display for DecodedEntry
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let base = format!("{:#x}", self.physical_base);
        write!(f, "[{:3}] {:20}    {}", self.index, base, self.flags)?;
        for marker in &self.markers {
            write!(f, " {marker}")?;
        }
        Ok(())
    }
}

fn serialize_hex<S: serde::Serializer>(value: &u64, serializer: S) -> std::result::Result<S::Ok, S::Error>
{
    serializer.serialize_str(&format!("{value:#x}"))
}

/// Decode the bytes of one paging structure page
///
/// Zero entries are skipped; the rest come back in ascending index order.
///
/// ## Errors
///
/// - `InvalidArgument`: `page` is not exactly 4096 bytes
pub fn decode_page(page: &[u8]) -> Result<Vec<DecodedEntry>>
{
    if page.len() != ENTRIES_PER_PAGE * ENTRY_SIZE {
        return Err(KdbgError::InvalidArgument(format!(
            "a paging structure is {} bytes, got {}",
            ENTRIES_PER_PAGE * ENTRY_SIZE,
            page.len()
        )));
    }

    let entries = page
        .chunks_exact(ENTRY_SIZE)
        .enumerate()
        .filter_map(|(index, chunk)| {
            let mut word = [0u8; ENTRY_SIZE];
            word.copy_from_slice(chunk);
            let entry = PageTableEntry::new(u64::from_le_bytes(word));
            (!entry.is_empty()).then(|| DecodedEntry::new(index, entry))
        })
        .collect();
    Ok(entries)
}

/// Read and decode the paging structure page at `page_address`
///
/// ## Errors
///
/// - `Misaligned`: `page_address` is not on a 4 KiB boundary
/// - `MemoryRead`: the page is not readable
pub fn decode<M: MemoryAccess + ?Sized>(memory: &M, page_address: Address) -> Result<Vec<DecodedEntry>>
{
    if !page_address.is_page_aligned() {
        return Err(KdbgError::Misaligned {
            address: page_address,
            alignment: PAGE_SIZE,
        });
    }

    let page = memory.read_memory(page_address, ENTRIES_PER_PAGE * ENTRY_SIZE)?;
    let entries = decode_page(&page)?;
    debug!(page = %page_address, used = entries.len(), "decoded paging structure");
    Ok(entries)
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn page_with(entries: &[(usize, u64)]) -> Vec<u8>
    {
        let mut page = vec![0u8; 4096];
        for &(index, value) in entries {
            page[index * 8..index * 8 + 8].copy_from_slice(&value.to_le_bytes());
        }
        page
    }

    #[test]
    fn test_non_present_cow_entry()
    {
        let entry = PageTableEntry::new(0x200);
        assert_eq!(entry.flag_string(), ".........");
        assert_eq!(entry.markers().as_slice(), &["COW"]);
    }

    #[test]
    fn test_non_present_ignores_standard_bits()
    {
        let entry = PageTableEntry::new(0x1ff_fffe);
        assert!(!entry.is_present());
        assert_eq!(entry.flag_string(), ".........");
        assert_eq!(entry.markers().as_slice(), &["COW"]);

        let without_cow = PageTableEntry::new(0x1fe);
        assert_eq!(without_cow.flag_string(), ".........");
        assert!(without_cow.markers().is_empty());
    }

    #[test]
    fn test_all_standard_flags()
    {
        let entry = PageTableEntry::new(0x8000_0000_0020_31ff);
        assert_eq!(entry.flag_string(), "GSDANCUWP");
        assert_eq!(entry.physical_base(), Address::from(0x203000));
        assert!(entry.markers().is_empty());
    }

    #[test]
    fn test_present_cow_entry()
    {
        let entry = PageTableEntry::new(0x0010_0000 | 0x201);
        assert_eq!(entry.flag_string(), "........P");
        assert_eq!(entry.markers().as_slice(), &["COW"]);
    }

    #[test]
    fn test_decode_skips_zero_entries_in_order()
    {
        let page = page_with(&[(511, 0x3003), (0, 0x1003), (7, 0x200)]);
        let entries = decode_page(&page).unwrap();
        let indices: Vec<usize> = entries.iter().map(|entry| entry.index).collect();
        assert_eq!(indices, vec![0, 7, 511]);
        assert_eq!(entries[1].physical_base, Address::ZERO);
    }

    #[test]
    fn test_decode_rejects_short_page()
    {
        assert!(decode_page(&[0u8; 4088]).is_err());
    }

    #[test]
    fn test_display_line()
    {
        let line = DecodedEntry::new(3, PageTableEntry::new(0x0020_3203)).to_string();
        assert_eq!(line, "[  3] 0x203000                .......WP COW");

        let plain = DecodedEntry::new(12, PageTableEntry::new(0x0020_3003)).to_string();
        assert_eq!(plain, "[ 12] 0x203000                .......WP");
    }
}
