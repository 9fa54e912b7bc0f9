//! Current process and thread lookup through the scheduler queues.
//!
//! The scheduler keeps the running process at the front of a global
//! `process_queue`, and each process keeps its running thread at the front of
//! an embedded thread queue. Both queues share one layout:
//!
//! ```text
//! +0   queue   pointer to an array of element pointers
//! +8   len     number of elements
//! +16  front   index of the current element
//! ```

use serde::Serialize;
use tracing::debug;

use crate::error::{KdbgError, Result};
use crate::target::{MemoryAccess, SymbolResolver};
use crate::types::Address;

/// Snapshot of a scheduler queue's bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueHead
{
    /// Address of the queue record itself
    pub address: Address,
    /// Base of the element pointer array
    pub elements: Address,
    /// Number of elements
    pub len: u64,
    /// Index of the current element
    pub front: u64,
}

impl QueueHead
{
    /// Read the queue record at `address`
    pub fn read<M: MemoryAccess + ?Sized>(memory: &M, address: Address) -> Result<Self>
    {
        Ok(Self {
            address,
            elements: memory.read_pointer(address)?,
            len: memory.read_u64(field_address(address, 8, "queue length")?)?,
            front: memory.read_u64(field_address(address, 16, "queue front")?)?,
        })
    }

    /// Pointer stored at `queue[front]`
    ///
    /// ## Errors
    ///
    /// - `EmptyQueue`: `len` is zero or `front` is past the end
    pub fn current<M: MemoryAccess + ?Sized>(&self, memory: &M, name: &str) -> Result<Address>
    {
        if self.front >= self.len {
            return Err(KdbgError::EmptyQueue {
                symbol: name.to_string(),
                len: self.len,
                front: self.front,
            });
        }
        let slot = self
            .front
            .checked_mul(8)
            .and_then(|offset| self.elements.checked_add(offset))
            .ok_or_else(|| KdbgError::InvalidArgument(format!("{name}: front index {} overflows", self.front)))?;
        memory.read_pointer(slot)
    }
}

fn field_address(base: Address, offset: u64, field: &str) -> Result<Address>
{
    base.checked_add(offset)
        .ok_or_else(|| KdbgError::InvalidArgument(format!("{field} at {base}+{offset:#x} overflows")))
}

/// The entry at the front of a scheduler queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueEntry
{
    /// Pointer to the process or thread structure
    pub pointer: Address,
    /// Queue it was taken from
    pub queue: QueueHead,
}

/// Current process: `*process_queue.queue[process_queue.front]`
pub fn current_process<T>(target: &T, queue_symbol: &str) -> Result<QueueEntry>
where
    T: MemoryAccess + SymbolResolver + ?Sized,
{
    let queue = QueueHead::read(target, target.resolve_symbol(queue_symbol)?)?;
    let pointer = queue.current(target, queue_symbol)?;
    debug!(process = %pointer, front = queue.front, len = queue.len, "current process");
    Ok(QueueEntry { pointer, queue })
}

/// Current thread of the current process
///
/// `thread_queue_offset` is the byte offset of the thread queue inside the
/// process structure.
pub fn current_thread<T>(target: &T, queue_symbol: &str, thread_queue_offset: u64) -> Result<QueueEntry>
where
    T: MemoryAccess + SymbolResolver + ?Sized,
{
    let process = current_process(target, queue_symbol)?;
    let queue = QueueHead::read(target, field_address(process.pointer, thread_queue_offset, "thread queue")?)?;
    let pointer = queue.current(target, "current process thread queue")?;
    debug!(thread = %pointer, process = %process.pointer, "current thread");
    Ok(QueueEntry { pointer, queue })
}
