//! # Exception Frame Step-Out
//!
//! Restores the register state saved by the CPU on exception entry, so the
//! debugger shows the interrupted code instead of the handler.
//!
//! On x86-64 the hardware pushes five quadwords before entering a handler
//! (without an error code), leaving `rsp` pointing at:
//!
//! ```text
//! rsp + 0   RIP     interrupted instruction
//! rsp + 8   CS      code segment selector
//! rsp + 16  RFLAGS
//! rsp + 24  RSP     interrupted stack pointer
//! rsp + 32  SS      stack segment selector
//! ```
//!
//! ## Preconditions
//!
//! The target must be halted exactly at an exception boundary with that
//! layout on top of the stack. Nothing on this path carries a magic number, so
//! the precondition cannot be checked here: stepping out anywhere else loads
//! five arbitrary stack words into the CPU state. It is the caller's contract.
//!
//! ## Write ordering
//!
//! Register writes through a debugger are individual operations; there is no
//! way to commit five of them atomically. The order is fixed so the state only
//! passes through combinations that are at worst stale, never mixed across
//! privilege levels: segment selectors (`cs`, `ss`) first, then `rflags`, then
//! `rip`, and `rsp` last so the stack pointer only moves once the rest of the
//! context is consistent. `rsp` is taken directly from offset 24.
//!
//! This ordering has not been validated against every hardware exception path
//! (for instance handlers entered with an error code shift the frame by eight
//! bytes) and should be confirmed before relying on it for a real target.
//!
//! All five words are read before the first write, so a memory failure leaves
//! the registers untouched. The current values are saved as well: when a host
//! fails *during* the writes, the committed registers are written back in
//! reverse order and the error lists them along with the rollback outcome.

use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{KdbgError, Result};
use crate::target::{ensure_stopped, MemoryAccess, RegisterAccess};
use crate::types::{Address, RegisterId};

/// Order in which the saved registers are committed
pub const RESTORE_ORDER: [RegisterId; 5] = [
    RegisterId::Cs,
    RegisterId::Ss,
    RegisterId::Rflags,
    RegisterId::Rip,
    RegisterId::Rsp,
];

/// The five machine words saved by the CPU on exception entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExceptionFrame
{
    /// Interrupted instruction pointer
    pub rip: Address,
    /// Code segment selector
    pub cs: u64,
    /// Saved flags
    pub rflags: u64,
    /// Interrupted stack pointer
    pub rsp: Address,
    /// Stack segment selector
    pub ss: u64,
}

impl ExceptionFrame
{
    /// Read the frame sitting at `stack_pointer`
    pub fn read<M: MemoryAccess + ?Sized>(memory: &M, stack_pointer: Address) -> Result<Self>
    {
        let word = |offset: u64| {
            let address = stack_pointer.checked_add(offset).ok_or_else(|| {
                KdbgError::InvalidArgument(format!("exception frame at {stack_pointer} runs past the address space"))
            })?;
            memory.read_u64(address)
        };
        Ok(Self {
            rip: Address::from(word(0)?),
            cs: word(8)?,
            rflags: word(16)?,
            rsp: Address::from(word(24)?),
            ss: word(32)?,
        })
    }

    /// Saved value of one of the frame's registers
    pub fn get(&self, id: RegisterId) -> Option<u64>
    {
        match id {
            RegisterId::Rip => Some(self.rip.value()),
            RegisterId::Cs => Some(self.cs),
            RegisterId::Rflags => Some(self.rflags),
            RegisterId::Rsp => Some(self.rsp.value()),
            RegisterId::Ss => Some(self.ss),
            RegisterId::Cr3 => None,
        }
    }
}

impl fmt::Display for ExceptionFrame
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        writeln!(f, "Stepping out of exception")?;
        writeln!(f, "RIP: {:#x}", self.rip)?;
        writeln!(f, "CS: {:#x}", self.cs)?;
        writeln!(f, "EFLAGS: {:#x}", self.rflags)?;
        writeln!(f, "RSP: {:#x}", self.rsp)?;
        write!(f, "SS: {:#x}", self.ss)
    }
}

/// Step out of the exception frame on top of the current stack
///
/// Selects the outermost frame, reads the saved context at the current `rsp`
/// and commits it in [`RESTORE_ORDER`].
///
/// ## Errors
///
/// - `TargetRunning`: the target is not halted
/// - `RegisterRead` / `MemoryRead`: the frame could not be read (no register
///   has been written)
/// - `RegisterWrite`: the first write failed (no register has been written)
/// - `PartialRestore`: a later write failed; the committed registers are
///   listed and were written back where possible
pub fn step_out<T>(target: &mut T) -> Result<ExceptionFrame>
where
    T: MemoryAccess + RegisterAccess + ?Sized,
{
    ensure_stopped(&*target)?;
    target.select_outermost_frame()?;

    let stack_pointer = Address::from(target.read_register(RegisterId::Rsp)?);
    let frame = ExceptionFrame::read(&*target, stack_pointer)?;
    debug!(%stack_pointer, ?frame, "read exception frame");

    // A register the host cannot read yet can still be written; it just
    // cannot be rolled back.
    let previous = RESTORE_ORDER.map(|id| target.read_register(id).ok());

    let mut committed = Vec::with_capacity(RESTORE_ORDER.len());
    for (slot, id) in RESTORE_ORDER.into_iter().enumerate() {
        let Some(value) = frame.get(id) else {
            continue;
        };
        if let Err(err) = target.write_register(id, value) {
            if committed.is_empty() {
                return Err(err);
            }
            let rolled_back = roll_back(target, &committed, &previous);
            warn!(failed = %id, ?committed, rolled_back, "exception step-out failed part way");
            return Err(KdbgError::PartialRestore {
                failed: id,
                committed: committed.iter().map(|&(_, id)| id).collect(),
                rolled_back,
                details: match err {
                    KdbgError::RegisterWrite { details, .. } => details,
                    other => other.to_string(),
                },
            });
        }
        committed.push((slot, id));
    }
    info!(rip = %frame.rip, rsp = %frame.rsp, "stepped out of exception");
    Ok(frame)
}

/// Write the saved values of `committed` back, newest first
///
/// Returns `false` if any register had no saved value or refused the write.
fn roll_back<T>(target: &mut T, committed: &[(usize, RegisterId)], previous: &[Option<u64>]) -> bool
where
    T: RegisterAccess + ?Sized,
{
    let mut complete = true;
    for &(slot, id) in committed.iter().rev() {
        match previous[slot] {
            Some(value) => {
                if let Err(err) = target.write_register(id, value) {
                    warn!(register = %id, %err, "could not restore register");
                    complete = false;
                }
            }
            None => {
                warn!(register = %id, "no saved value to restore");
                complete = false;
            }
        }
    }
    complete
}
