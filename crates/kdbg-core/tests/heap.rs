//! Heap walker tests over synthetic heaps

use kdbg_core::heap::{self, BlockState, CorruptionKind, HEADER_MAGIC, HEADER_SIZE, TAIL_MAGIC, TAIL_SIZE};
use kdbg_core::platform::snapshot::{MemoryImage, SnapshotTarget};
use kdbg_core::{Address, Command, KdbgError, KernelLayout, Report};

const HEAP_BASE: u64 = 0xffff_8000_0010_0000;
const BASE_VAR: u64 = 0xffff_8000_0000_2000;
const END_VAR: u64 = 0xffff_8000_0000_2008;

/// Builds a heap image block by block
struct HeapBuilder
{
    bytes: Vec<u8>,
}

impl HeapBuilder
{
    fn new() -> Self
    {
        Self { bytes: Vec::new() }
    }

    fn block(self, size: u64, allocated: bool) -> Self
    {
        self.raw_block(HEADER_MAGIC, size, allocated, TAIL_MAGIC, None)
    }

    fn raw_block(mut self, magic: u32, size: u64, allocated: bool, tail_magic: u32, back: Option<u64>) -> Self
    {
        let header = HEAP_BASE + self.bytes.len() as u64;
        self.bytes.extend_from_slice(&magic.to_le_bytes());
        self.bytes.extend_from_slice(&u32::from(allocated).to_le_bytes());
        self.bytes.extend_from_slice(&size.to_le_bytes());
        self.bytes.resize(self.bytes.len() + size as usize, 0xcc);
        self.bytes.extend_from_slice(&tail_magic.to_le_bytes());
        self.bytes.extend_from_slice(&0u32.to_le_bytes());
        self.bytes.extend_from_slice(&back.unwrap_or(header).to_le_bytes());
        self
    }

    fn end(&self) -> u64
    {
        HEAP_BASE + self.bytes.len() as u64
    }

    fn target(self) -> SnapshotTarget
    {
        let end = self.end();
        target_with_bounds(self.bytes, HEAP_BASE, end)
    }
}

fn target_with_bounds(heap: Vec<u8>, base: u64, end: u64) -> SnapshotTarget
{
    let mut globals = Vec::new();
    globals.extend_from_slice(&base.to_le_bytes());
    globals.extend_from_slice(&end.to_le_bytes());
    SnapshotTarget::new()
        .with_memory(
            MemoryImage::new()
                .with_region(Address::from(HEAP_BASE), heap)
                .with_region(Address::from(BASE_VAR), globals),
        )
        .with_symbol("kh_base_addr", Address::from(BASE_VAR))
        .with_symbol("kh_end_addr", Address::from(END_VAR))
}

fn print_heap(target: &mut SnapshotTarget) -> heap::HeapWalk
{
    match Command::PrintHeap.invoke(target, &KernelLayout::default()).unwrap() {
        Report::Heap(walk) => walk,
        other => panic!("unexpected report: {other:?}"),
    }
}

#[test]
fn test_two_block_heap()
{
    let mut target = HeapBuilder::new().block(64, true).block(32, false).target();
    let walk = print_heap(&mut target);

    assert!(walk.is_clean());
    assert_eq!(walk.count(), 2);
    assert_eq!(walk.blocks[0].state, BlockState::Allocated);
    assert_eq!(walk.blocks[0].size, 64);
    assert_eq!(walk.blocks[0].address, Address::from(HEAP_BASE + HEADER_SIZE));
    assert_eq!(walk.blocks[1].state, BlockState::Free);
    assert_eq!(walk.blocks[1].size, 32);
    assert_eq!(walk.blocks[1].header, Address::from(HEAP_BASE + HEADER_SIZE + 64 + TAIL_SIZE));
}

#[test]
fn test_two_block_heap_text()
{
    let mut target = HeapBuilder::new().block(64, true).block(32, false).target();
    let report = Command::PrintHeap.invoke(&mut target, &KernelLayout::default()).unwrap();
    let expected = "\
0xffff800000100010: allocated, size 64 (0x40)
0xffff800000100070: free, size 32 (0x20)
2 objects total";
    assert_eq!(report.to_string(), expected);
    assert!(report.heap_corruption().is_none());
}

#[test]
fn test_heap_report_json_byte_totals()
{
    let mut target = HeapBuilder::new().block(64, true).block(32, false).block(16, true).target();
    let report = Command::PrintHeap.invoke(&mut target, &KernelLayout::default()).unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["report"], "heap");
    assert_eq!(json["allocated_bytes"], 80);
    assert_eq!(json["free_bytes"], 32);
    assert_eq!(json["blocks"].as_array().map(Vec::len), Some(3));
    assert!(json["corruption"].is_null());
}

#[test]
fn test_corrupted_tail_magic_stops_before_first_block()
{
    let builder = HeapBuilder::new()
        .raw_block(HEADER_MAGIC, 64, true, 0x0bad_c0de, None)
        .block(32, false);
    let mut target = builder.target();
    let walk = print_heap(&mut target);

    assert_eq!(walk.count(), 0);
    let corruption = walk.corruption.unwrap();
    assert_eq!(corruption.kind, CorruptionKind::BadTailMagic { found: 0x0bad_c0de });
    assert_eq!(corruption.address, Address::from(HEAP_BASE + HEADER_SIZE + 64));
    assert!(corruption.to_string().starts_with("Bad tail magic number: 0xbadc0de"));
}

#[test]
fn test_bad_header_magic_in_second_block_keeps_first()
{
    let mut target = HeapBuilder::new()
        .block(48, true)
        .raw_block(0x1234_5678, 16, false, TAIL_MAGIC, None)
        .target();
    let walk = print_heap(&mut target);

    assert_eq!(walk.count(), 1);
    let corruption = walk.corruption.unwrap();
    assert_eq!(corruption.kind, CorruptionKind::BadHeaderMagic { found: 0x1234_5678 });
    assert_eq!(corruption.address, Address::from(HEAP_BASE + HEADER_SIZE + 48 + TAIL_SIZE));
}

#[test]
fn test_unmatched_tail_back_pointer()
{
    let mut target = HeapBuilder::new()
        .raw_block(HEADER_MAGIC, 32, true, TAIL_MAGIC, Some(0xdead_0000))
        .target();
    let walk = print_heap(&mut target);

    assert_eq!(walk.count(), 0);
    assert_eq!(
        walk.corruption.unwrap().kind,
        CorruptionKind::UnmatchedHeader { found: Address::from(0xdead_0000) }
    );
}

#[test]
fn test_oversized_block_is_an_overrun()
{
    let builder = HeapBuilder::new().block(32, true);
    let end = builder.end();
    let mut bytes = builder.bytes;
    // Grow the size so the tail lands past the heap end
    bytes[8..16].copy_from_slice(&4096u64.to_le_bytes());
    let mut target = target_with_bounds(bytes, HEAP_BASE, end);
    let walk = print_heap(&mut target);

    assert_eq!(walk.count(), 0);
    assert_eq!(walk.corruption.unwrap().kind, CorruptionKind::BlockOverrun { size: 4096 });
}

#[test]
fn test_well_formed_heaps_cover_the_whole_range()
{
    let layouts: [&[(u64, bool)]; 4] = [
        &[(16, true)],
        &[(64, true), (32, false)],
        &[(0, false), (8, true), (128, true), (24, false)],
        &[(4000, true), (16, false), (16, false), (512, true), (48, true)],
    ];

    for layout in layouts {
        let builder = layout
            .iter()
            .fold(HeapBuilder::new(), |builder, &(size, allocated)| builder.block(size, allocated));
        let span = builder.end() - HEAP_BASE;
        let walk = heap::walk(&builder.target(), Address::from(HEAP_BASE), Address::from(HEAP_BASE + span)).unwrap();

        assert!(walk.is_clean());
        assert_eq!(walk.count(), layout.len());
        let covered: u64 = walk.blocks.iter().map(|block| HEADER_SIZE + block.size + TAIL_SIZE).sum();
        assert_eq!(covered, span);
        assert_eq!(
            walk.bytes_in(BlockState::Allocated) + walk.bytes_in(BlockState::Free),
            layout.iter().map(|&(size, _)| size).sum::<u64>()
        );
    }
}

#[test]
fn test_empty_heap()
{
    let walk = heap::walk(&SnapshotTarget::new(), Address::from(HEAP_BASE), Address::from(HEAP_BASE)).unwrap();
    assert!(walk.is_clean());
    assert_eq!(walk.count(), 0);
}

#[test]
fn test_unreadable_heap_is_an_access_failure()
{
    let mut target = target_with_bounds(Vec::new(), HEAP_BASE, HEAP_BASE + 64);
    let err = Command::PrintHeap.invoke(&mut target, &KernelLayout::default()).unwrap_err();
    assert!(matches!(err, KdbgError::MemoryRead { .. }));
}

#[test]
fn test_missing_heap_symbol()
{
    let mut target = SnapshotTarget::new();
    let err = Command::PrintHeap.invoke(&mut target, &KernelLayout::default()).unwrap_err();
    assert!(matches!(err, KdbgError::SymbolNotFound(name) if name == "kh_base_addr"));
}
