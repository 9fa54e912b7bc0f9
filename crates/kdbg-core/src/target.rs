//! # Target Capabilities
//!
//! The interface every host must provide so the commands can inspect a halted
//! kernel.
//!
//! The core never owns process or register state. It only asks the host for
//! three things, each behind its own trait:
//!
//! - [`MemoryAccess`]: read a byte range at an address
//! - [`RegisterAccess`]: read and write registers of the selected frame
//! - [`SymbolResolver`]: turn a kernel global's name into its address
//!
//! A host that provides all three is a [`Target`] through the blanket impl.
//!
//! ## Preconditions
//!
//! Every operation assumes the debuggee is stopped for the full duration of the
//! call and that no other command runs against the same target concurrently.
//! Commands that mutate registers check [`RegisterAccess::is_stopped`] and fail
//! with [`KdbgError::TargetRunning`]; read-only commands cannot detect a
//! running target and will decode whatever bytes the host returns. Behaviour
//! against a running target is undefined.

use crate::error::{KdbgError, Result};
use crate::types::{Address, RegisterId};

/// Raw memory reads at an address
pub trait MemoryAccess
{
    /// Read `len` bytes starting at `address`
    ///
    /// ## Errors
    ///
    /// - `MemoryRead`: any byte of the range is unreadable. Implementations
    ///   must not return a short buffer.
    fn read_memory(&self, address: Address, len: usize) -> Result<Vec<u8>>;

    /// Read exactly `N` bytes into an array
    fn read_array<const N: usize>(&self, address: Address) -> Result<[u8; N]>
    {
        let bytes = self.read_memory(address, N)?;
        <[u8; N]>::try_from(bytes.as_slice()).map_err(|_| KdbgError::MemoryRead {
            address,
            len: N,
            details: format!("host returned {} bytes", bytes.len()),
        })
    }

    /// Read a little-endian 32-bit word
    fn read_u32(&self, address: Address) -> Result<u32>
    {
        self.read_array(address).map(u32::from_le_bytes)
    }

    /// Read a little-endian 64-bit word
    fn read_u64(&self, address: Address) -> Result<u64>
    {
        self.read_array(address).map(u64::from_le_bytes)
    }

    /// Read a pointer-sized value and treat it as an address
    fn read_pointer(&self, address: Address) -> Result<Address>
    {
        self.read_u64(address).map(Address::from)
    }
}

/// Register reads and writes on the currently selected frame
pub trait RegisterAccess
{
    /// Read a register of the selected frame
    ///
    /// ## Errors
    ///
    /// - `RegisterRead`: the register is unavailable in the current state
    fn read_register(&self, id: RegisterId) -> Result<u64>;

    /// Write a register of the selected frame
    ///
    /// ## ⚠️ Warning
    ///
    /// Each call is an independent host operation. A sequence of writes is
    /// never atomic: if the host fails halfway, the earlier writes stay
    /// committed.
    ///
    /// ## Errors
    ///
    /// - `RegisterWrite`: the host refused the write
    fn write_register(&mut self, id: RegisterId, value: u64) -> Result<()>;

    /// Whether the target is halted
    fn is_stopped(&self) -> bool;

    /// Select the outermost (newest) call frame so that register writes land
    /// on the live CPU state instead of an unwound caller frame
    ///
    /// The default implementation does nothing, which is right for hosts that
    /// only ever expose a single frame.
    fn select_outermost_frame(&mut self) -> Result<()>
    {
        Ok(())
    }
}

/// Named-symbol resolution
pub trait SymbolResolver
{
    /// Address of the named kernel global
    ///
    /// ## Errors
    ///
    /// - `SymbolNotFound`: the symbol is absent. Callers must never fall back
    ///   to a guessed address.
    fn resolve_symbol(&self, name: &str) -> Result<Address>;
}

/// Everything a command may need from its host
pub trait Target: MemoryAccess + RegisterAccess + SymbolResolver {}

impl<T> Target for T where T: MemoryAccess + RegisterAccess + SymbolResolver {}

/// Fail with `TargetRunning` unless the target is halted
pub(crate) fn ensure_stopped<R: RegisterAccess + ?Sized>(registers: &R) -> Result<()>
{
    if registers.is_stopped() {
        Ok(())
    } else {
        Err(KdbgError::TargetRunning)
    }
}
