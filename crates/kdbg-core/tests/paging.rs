//! Paging structure and relocation tests against a physical memory image

use kdbg_core::paging::ENTRIES_PER_PAGE;
use kdbg_core::platform::snapshot::{MemoryImage, SnapshotTarget};
use kdbg_core::relocate::relocate;
use kdbg_core::{Address, Command, KdbgError, KernelLayout, RegisterId, RegisterSet, Report};

const PML4_PHYS: u64 = 0x0010_0000;

fn page_with(entries: &[(usize, u64)]) -> Vec<u8>
{
    let mut page = vec![0u8; ENTRIES_PER_PAGE * 8];
    for &(index, value) in entries {
        page[index * 8..index * 8 + 8].copy_from_slice(&value.to_le_bytes());
    }
    page
}

fn target(page: Vec<u8>) -> SnapshotTarget
{
    SnapshotTarget::new()
        .with_memory(MemoryImage::new().with_physical(Address::from(PML4_PHYS), page))
        .with_registers(RegisterSet::new().with(RegisterId::Cr3, PML4_PHYS))
}

fn run(target: &mut SnapshotTarget, command: Command) -> Report
{
    command.invoke(target, &KernelLayout::default()).unwrap()
}

#[test]
fn test_relocate_page_address()
{
    let report = run(&mut SnapshotTarget::new(), Command::Relocate { value: 0x1000 });
    assert_eq!(report.to_string(), "0xfffffe0000001000");
}

#[test]
fn test_pml4t_then_print_page()
{
    let mut target = target(page_with(&[(0, 0x0020_1003), (256, 0x0030_0023), (511, 0x200)]));

    let Report::Address(root) = run(&mut target, Command::Pml4t) else {
        panic!("pml4t should report an address");
    };
    assert_eq!(root.virtual_address, relocate(PML4_PHYS));
    assert!(root.in_window);

    let report = run(&mut target, Command::PrintPage { address: root.virtual_address });
    let expected = "\
[  0] 0x201000                .......WP
[256] 0x300000                ...A...WP
[511] 0x0                     ......... COW";
    assert_eq!(report.to_string(), expected);
}

#[test]
fn test_physical_page_is_readable_at_both_addresses()
{
    let mut target = target(page_with(&[(1, 0x5007)]));
    let physical = run(&mut target, Command::PrintPage { address: Address::from(PML4_PHYS) });
    let direct = run(&mut target, Command::PrintPage { address: relocate(PML4_PHYS) });
    assert_eq!(physical.to_string(), direct.to_string());
}

#[test]
fn test_non_present_entries_print_only_cow()
{
    // Every combination of the standard bits with P clear
    let entries: Vec<(usize, u64)> = (0..256u64).map(|bits| (bits as usize, 0x7000 | (bits << 1) | 0x200)).collect();
    let mut target = target(page_with(&entries));
    let Report::PageTable { entries, .. } = run(&mut target, Command::PrintPage { address: relocate(PML4_PHYS) }) else {
        panic!("print-page should report a page table");
    };
    assert_eq!(entries.len(), 256);
    for entry in entries {
        assert_eq!(entry.flags, ".........");
        assert_eq!(entry.markers.as_slice(), &["COW"]);
    }
}

#[test]
fn test_misaligned_page_address()
{
    let mut target = target(page_with(&[]));
    let err = Command::PrintPage { address: relocate(PML4_PHYS + 8) }
        .invoke(&mut target, &KernelLayout::default())
        .unwrap_err();
    assert!(matches!(err, KdbgError::Misaligned { alignment: 0x1000, .. }));
}

#[test]
fn test_unmapped_page()
{
    let mut target = target(page_with(&[]));
    let err = Command::PrintPage { address: relocate(0x0800_0000) }
        .invoke(&mut target, &KernelLayout::default())
        .unwrap_err();
    assert!(err.is_access_failure());
}

#[test]
fn test_print_page_index_masks_flags()
{
    let report = run(&mut SnapshotTarget::new(), Command::PrintPageIndex { value: 0x0020_1063 });
    let Report::Address(relocation) = report else {
        panic!("print-page-index should report an address");
    };
    assert_eq!(relocation.physical, Address::from(0x0020_1000));
    assert_eq!(relocation.virtual_address, Address::from(0xfffffe0000201000));
}

#[test]
fn test_pml4t_keeps_cr3_low_bits()
{
    let mut target = SnapshotTarget::new().with_registers(RegisterSet::new().with(RegisterId::Cr3, PML4_PHYS | 0x18));
    let report = run(&mut target, Command::Pml4t);
    assert_eq!(report.to_string(), "0xfffffe0000100018");
}

#[test]
fn test_pml4t_without_cr3()
{
    let err = Command::Pml4t
        .invoke(&mut SnapshotTarget::new(), &KernelLayout::default())
        .unwrap_err();
    assert!(matches!(err, KdbgError::RegisterRead { register: RegisterId::Cr3, .. }));
}
