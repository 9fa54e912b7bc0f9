//! # Error Types
//!
//! General error handling for the introspection commands.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.
//!
//! Heap corruption is deliberately *not* an error: a walk that stops on a bad
//! magic number still produces the blocks it visited, so corruption travels as
//! data on [`crate::heap::HeapWalk`].

use thiserror::Error;

use crate::types::{Address, RegisterId};

/// Main error type for introspection operations
///
/// ## Error Categories
///
/// 1. **Access failures**: MemoryRead, RegisterRead, RegisterWrite,
///    PartialRestore. These come straight from the host and are not retried.
/// 2. **Precondition violations**: Misaligned, TargetRunning, SymbolNotFound,
///    EmptyQueue. The command refuses to decode rather than print garbage.
/// 3. **Input errors**: InvalidArgument, Snapshot, Io
#[derive(Error, Debug)]
pub enum KdbgError
{
    /// The host could not read the requested memory range
    ///
    /// This happens when:
    /// - The address is not mapped in the target (or not present in the snapshot)
    /// - The range straddles a hole between two mapped regions
    #[error("Failed to read {len} bytes at {address}: {details}")]
    MemoryRead
    {
        /// First byte of the failed range
        address: Address,
        /// Number of bytes requested
        len: usize,
        /// Host-provided reason
        details: String,
    },

    /// Failed to read a register from the target
    #[error("Failed to read register {register}: {details}")]
    RegisterRead
    {
        /// Register that could not be read
        register: RegisterId,
        /// Host-provided reason
        details: String,
    },

    /// Failed to write a register in the target
    #[error("Failed to write register {register}: {details}")]
    RegisterWrite
    {
        /// Register that could not be written
        register: RegisterId,
        /// Host-provided reason
        details: String,
    },

    /// A multi-register restore failed after some registers were committed
    ///
    /// The committed registers are written back to their previous values in
    /// reverse order. `rolled_back` is `false` when a previous value was
    /// unreadable or a write-back failed, in which case the target holds a
    /// mix of old and restored values.
    #[error(
        "Failed to write register {failed} after committing {}: {details} ({})",
        register_list(.committed),
        rollback_state(*.rolled_back)
    )]
    PartialRestore
    {
        /// Register whose write failed
        failed: RegisterId,
        /// Registers written before the failure, in commit order
        committed: Vec<RegisterId>,
        /// Whether every committed register was restored
        rolled_back: bool,
        /// Host-provided reason for the failed write
        details: String,
    },

    /// A named kernel global could not be resolved
    ///
    /// Usually the kernel executable was built without symbols, or the
    /// layout configuration names a symbol this kernel does not export.
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// An address that must be aligned is not
    ///
    /// Page-table pages must start on a 4096-byte boundary; anything else
    /// would decode a window straddling two unrelated tables.
    #[error("Address {address} is not aligned to {alignment:#x} bytes")]
    Misaligned
    {
        /// Offending address
        address: Address,
        /// Required alignment in bytes
        alignment: u64,
    },

    /// The operation requires the target to be halted
    ///
    /// Every command assumes the debuggee is stopped for the whole call.
    /// Running it against a live target is a caller error, reported loudly.
    #[error("Target must be stopped for this operation")]
    TargetRunning,

    /// A scheduler queue has no valid front element
    #[error("Queue {symbol} has no current entry (len {len}, front {front})")]
    EmptyQueue
    {
        /// Symbol (or description) of the queue
        symbol: String,
        /// Queue length read from the target
        len: u64,
        /// Front index read from the target
        front: u64,
    },

    /// Invalid argument passed to a command
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The snapshot files could not be interpreted
    #[error("Invalid snapshot: {0}")]
    Snapshot(String),

    /// I/O error (for file operations, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl KdbgError
{
    /// Returns `true` for failures reported by the host's access capability
    pub const fn is_access_failure(&self) -> bool
    {
        matches!(
            self,
            Self::MemoryRead { .. }
                | Self::RegisterRead { .. }
                | Self::RegisterWrite { .. }
                | Self::PartialRestore { .. }
        )
    }
}

fn register_list(registers: &[RegisterId]) -> String
{
    let names: Vec<&str> = registers.iter().map(|id| id.name()).collect();
    names.join(", ")
}

const fn rollback_state(rolled_back: bool) -> &'static str
{
    if rolled_back {
        "rolled back"
    } else {
        "rollback incomplete"
    }
}

/// Convenience type alias for `Result<T, KdbgError>`
///
/// ```rust
/// use kdbg_core::error::Result;
/// fn foo() -> Result<()>
/// {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, KdbgError>;
