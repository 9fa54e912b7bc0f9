//! # Kernel Heap Walker
//!
//! Traverses the kernel heap's block chain and classifies every block as
//! allocated or free.
//!
//! The heap is a contiguous run of blocks from `kh_base_addr` to `kh_end_addr`.
//! Each block is framed by a header and a tail:
//!
//! ```text
//! +-------------------------------+----------------+--------------------------+
//! | header                        | payload        | tail                     |
//! | magic u32 | flags u32 | size  | `size` bytes   | magic u32 | pad | header* |
//! +-------------------------------+----------------+--------------------------+
//! ```
//!
//! The walk validates every link of that chain and stops at the first
//! inconsistency. It never tries to resynchronise by scanning for the next
//! plausible magic number: once a boundary is wrong, every later boundary is a
//! guess, and a guessed boundary misreports allocated/free state.

use std::fmt;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use tracing::{debug, warn};

use crate::error::Result;
use crate::target::{MemoryAccess, SymbolResolver};
use crate::types::Address;

/// Magic number at the start of every block header
pub const HEADER_MAGIC: u32 = 0x0724_2005;

/// Magic number at the start of every block tail
pub const TAIL_MAGIC: u32 = 0xdead_c0de;

/// Size of the header record (`magic`, `flags`, `size`)
pub const HEADER_SIZE: u64 = 16;

/// Size of the tail record (`magic`, padding, back-pointer)
pub const TAIL_SIZE: u64 = 16;

/// Header flag marking the block as allocated
pub const FLAG_ALLOCATED: u32 = 1 << 0;

/// Allocation state of a heap block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockState
{
    /// Handed out by the allocator
    Allocated,
    /// Available for allocation
    Free,
}

impl fmt::Display for BlockState
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            BlockState::Allocated => f.write_str("allocated"),
            BlockState::Free => f.write_str("free"),
        }
    }
}

/// A block that passed every consistency check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeapBlock
{
    /// Address of the payload (what the allocator hands out)
    pub address: Address,
    /// Address of the block header
    pub header: Address,
    /// Allocated or free
    pub state: BlockState,
    /// Payload size in bytes
    pub size: u64,
}

impl fmt::Display for HeapBlock
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{:#x}: {}, size {} ({:#x})", self.address, self.state, self.size, self.size)
    }
}

/// Which consistency check failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "check")]
pub enum CorruptionKind
{
    /// Header magic is not [`HEADER_MAGIC`]
    BadHeaderMagic
    {
        /// Value found in place of the magic
        found: u32,
    },
    /// Tail magic is not [`TAIL_MAGIC`]
    BadTailMagic
    {
        /// Value found in place of the magic
        found: u32,
    },
    /// Tail back-pointer does not point at its own header
    UnmatchedHeader
    {
        /// Back-pointer found in the tail
        found: Address,
    },
    /// Header size puts the tail beyond the end of the heap
    BlockOverrun
    {
        /// Size found in the header
        size: u64,
    },
}

/// Where and why a walk stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeapCorruption
{
    /// Address of the record that failed the check (header or tail)
    pub address: Address,
    /// The failed check
    #[serde(flatten)]
    pub kind: CorruptionKind,
}

impl fmt::Display for HeapCorruption
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self.kind {
            CorruptionKind::BadHeaderMagic { found } => {
                write!(f, "Bad header magic number: {found:#x} (header at {:#x})", self.address)
            }
            CorruptionKind::BadTailMagic { found } => {
                write!(f, "Bad tail magic number: {found:#x} (tail at {:#x})", self.address)
            }
            CorruptionKind::UnmatchedHeader { found } => write!(
                f,
                "Unmatched header in tail block: points to {found:#x} (tail at {:#x})",
                self.address
            ),
            CorruptionKind::BlockOverrun { size } => write!(
                f,
                "Block size {size:#x} overruns the heap end (header at {:#x})",
                self.address
            ),
        }
    }
}

/// Outcome of a heap walk
///
/// `blocks` always holds every block validated before the walk ended, whether
/// it reached the end cleanly or stopped on corruption. The serialized form
/// also carries `allocated_bytes` and `free_bytes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapWalk
{
    /// First header address
    pub base: Address,
    /// End of the heap (exclusive)
    pub end: Address,
    /// Validated blocks in address order
    pub blocks: Vec<HeapBlock>,
    /// Why the walk stopped early, if it did
    pub corruption: Option<HeapCorruption>,
}

impl HeapWalk
{
    /// Number of blocks visited successfully
    pub fn count(&self) -> usize
    {
        self.blocks.len()
    }

    /// Whether the walk reached `end` without finding corruption
    pub fn is_clean(&self) -> bool
    {
        self.corruption.is_none()
    }

    /// Total payload bytes in blocks of the given state
    pub fn bytes_in(&self, state: BlockState) -> u64
    {
        self.blocks
            .iter()
            .filter(|block| block.state == state)
            .map(|block| block.size)
            .sum()
    }
}

impl Serialize for HeapWalk
{
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    {
        let mut state = serializer.serialize_struct("HeapWalk", 6)?;
        state.serialize_field("base", &self.base)?;
        state.serialize_field("end", &self.end)?;
        state.serialize_field("blocks", &self.blocks)?;
        state.serialize_field("corruption", &self.corruption)?;
        state.serialize_field("allocated_bytes", &self.bytes_in(BlockState::Allocated))?;
        state.serialize_field("free_bytes", &self.bytes_in(BlockState::Free))?;
        state.end()
    }
}

#[derive(Debug, Clone, Copy)]
struct Header
{
    magic: u32,
    flags: u32,
    size: u64,
}

impl Header
{
    fn read<M: MemoryAccess + ?Sized>(memory: &M, address: Address) -> Result<Self>
    {
        let bytes: [u8; HEADER_SIZE as usize] = memory.read_array(address)?;
        Ok(Self {
            magic: le_u32(&bytes[0..4]),
            flags: le_u32(&bytes[4..8]),
            size: le_u64(&bytes[8..16]),
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Tail
{
    magic: u32,
    header: Address,
}

impl Tail
{
    fn read<M: MemoryAccess + ?Sized>(memory: &M, address: Address) -> Result<Self>
    {
        let bytes: [u8; TAIL_SIZE as usize] = memory.read_array(address)?;
        Ok(Self {
            magic: le_u32(&bytes[0..4]),
            header: Address::from(le_u64(&bytes[8..16])),
        })
    }
}

fn le_u32(bytes: &[u8]) -> u32
{
    let mut word = [0u8; 4];
    word.copy_from_slice(bytes);
    u32::from_le_bytes(word)
}

fn le_u64(bytes: &[u8]) -> u64
{
    let mut word = [0u8; 8];
    word.copy_from_slice(bytes);
    u64::from_le_bytes(word)
}

/// Walk the heap from `base` to `end`
///
/// ## Errors
///
/// - `MemoryRead`: a header or tail could not be read. Corruption is not an
///   error; it ends the walk and is reported on the returned [`HeapWalk`].
pub fn walk<M: MemoryAccess + ?Sized>(memory: &M, base: Address, end: Address) -> Result<HeapWalk>
{
    let mut blocks = Vec::new();
    let mut corruption = None;
    let mut header_address = base;

    while header_address < end {
        match visit(memory, header_address, end)? {
            Ok(block) => {
                debug!(header = %block.header, size = block.size, state = %block.state, "heap block");
                header_address = block.address + block.size + TAIL_SIZE;
                blocks.push(block);
            }
            Err(found) => {
                warn!(visited = blocks.len(), "heap walk stopped: {found}");
                corruption = Some(found);
                break;
            }
        }
    }

    Ok(HeapWalk {
        base,
        end,
        blocks,
        corruption,
    })
}

/// Validate the block whose header is at `header_address`
///
/// The outer `Result` carries access failures, the inner one corruption.
fn visit<M: MemoryAccess + ?Sized>(
    memory: &M,
    header_address: Address,
    end: Address,
) -> Result<std::result::Result<HeapBlock, HeapCorruption>>
{
    let header = Header::read(memory, header_address)?;
    if header.magic != HEADER_MAGIC {
        return Ok(Err(HeapCorruption {
            address: header_address,
            kind: CorruptionKind::BadHeaderMagic { found: header.magic },
        }));
    }

    let payload = header_address + HEADER_SIZE;
    let tail_address = payload.checked_add(header.size);
    let fits = tail_address
        .and_then(|tail| tail.checked_add(TAIL_SIZE))
        .is_some_and(|tail_end| tail_end <= end);
    let Some(tail_address) = tail_address.filter(|_| fits) else {
        return Ok(Err(HeapCorruption {
            address: header_address,
            kind: CorruptionKind::BlockOverrun { size: header.size },
        }));
    };

    let tail = Tail::read(memory, tail_address)?;
    if tail.magic != TAIL_MAGIC {
        return Ok(Err(HeapCorruption {
            address: tail_address,
            kind: CorruptionKind::BadTailMagic { found: tail.magic },
        }));
    }
    if tail.header != header_address {
        return Ok(Err(HeapCorruption {
            address: tail_address,
            kind: CorruptionKind::UnmatchedHeader { found: tail.header },
        }));
    }

    let state = if header.flags & FLAG_ALLOCATED != 0 {
        BlockState::Allocated
    } else {
        BlockState::Free
    };
    Ok(Ok(HeapBlock {
        address: payload,
        header: header_address,
        state,
        size: header.size,
    }))
}

/// Read the heap bounds from the kernel globals naming them
///
/// Both symbols are pointer variables; their *contents* are the bounds.
pub fn heap_bounds<T>(target: &T, base_symbol: &str, end_symbol: &str) -> Result<(Address, Address)>
where
    T: MemoryAccess + SymbolResolver + ?Sized,
{
    let base = target.read_pointer(target.resolve_symbol(base_symbol)?)?;
    let end = target.read_pointer(target.resolve_symbol(end_symbol)?)?;
    debug!(%base, %end, "resolved heap bounds");
    Ok((base, end))
}
