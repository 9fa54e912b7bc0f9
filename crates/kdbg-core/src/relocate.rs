//! Physical to direct-map address relocation.
//!
//! The kernel maps all of physical memory at a fixed virtual window starting at
//! [`DIRECT_MAP_BASE`]. A physical address `p` is reachable at
//! `DIRECT_MAP_BASE | p`. The window is 2 TiB wide; inputs above that still
//! relocate (the OR is total) but alias a different physical address, which
//! [`Relocation::in_window`] reports.

use serde::Serialize;
use tracing::warn;

use crate::error::Result;
use crate::target::RegisterAccess;
use crate::types::{Address, RegisterId, PAGE_OFFSET_MASK};

/// First virtual address of the physical-memory direct map
pub const DIRECT_MAP_BASE: u64 = 0xffff_fe00_0000_0000;

/// Size of the direct-map window (2 TiB)
pub const DIRECT_MAP_SIZE: u64 = 1 << 41;

/// Map a physical address into the direct map
///
/// ```rust
/// use kdbg_core::relocate::relocate;
///
/// assert_eq!(relocate(0x1000).value(), 0xfffffe0000001000);
/// ```
pub const fn relocate(physical: u64) -> Address
{
    Address::new(DIRECT_MAP_BASE | physical)
}

/// Result of a relocation, with the input kept for presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Relocation
{
    /// Value that was relocated
    pub physical: Address,
    /// Direct-map virtual address
    pub virtual_address: Address,
    /// Whether `physical` lies inside the 2 TiB window
    pub in_window: bool,
}

impl Relocation
{
    /// Relocate `physical` and record whether it fits the window
    pub fn of(physical: u64) -> Self
    {
        let in_window = physical < DIRECT_MAP_SIZE;
        if !in_window {
            warn!(physical = %Address::from(physical), "relocating an address outside the direct map window");
        }
        Self {
            physical: Address::from(physical),
            virtual_address: relocate(physical),
            in_window,
        }
    }
}

/// Direct-map address of the active top-level page table (`cr3`, unmasked)
pub fn page_table_root<R: RegisterAccess + ?Sized>(registers: &R) -> Result<Relocation>
{
    let cr3 = registers.read_register(RegisterId::Cr3)?;
    Ok(Relocation::of(cr3))
}

/// Direct-map address of the page-table page an entry value points into
///
/// The low 12 bits (flags) are dropped before relocation.
pub fn page_index_address(entry: u64) -> Relocation
{
    Relocation::of(entry & !PAGE_OFFSET_MASK)
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_relocate_page()
    {
        assert_eq!(relocate(0x1000), Address::from(0xfffffe0000001000));
    }

    #[test]
    fn test_relocate_is_idempotent()
    {
        let once = relocate(0x0012_3456);
        assert_eq!(relocate(once.value()), once);
    }

    #[test]
    fn test_relocate_keeps_pattern_and_window_bits()
    {
        for physical in [0u64, 1, 0xfff, 0x1000, 0x0000_7fff_ffff_f000, DIRECT_MAP_SIZE - 1, 0xdead_beef] {
            let virt = relocate(physical).value();
            assert_eq!(virt & DIRECT_MAP_BASE, DIRECT_MAP_BASE);
            assert_eq!(virt & (DIRECT_MAP_SIZE - 1), physical & (DIRECT_MAP_SIZE - 1));
        }
    }

    #[test]
    fn test_window_check()
    {
        assert!(Relocation::of(DIRECT_MAP_SIZE - 1).in_window);
        assert!(!Relocation::of(DIRECT_MAP_SIZE).in_window);
    }

    #[test]
    fn test_page_index_masks_flags()
    {
        let relocation = page_index_address(0x0000_0000_0020_3067);
        assert_eq!(relocation.virtual_address, Address::from(0xfffffe0000203000));
        assert_eq!(relocation.physical, Address::from(0x203000));
    }
}
