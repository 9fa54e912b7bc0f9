//! Interrupt-enable toggling through the saved flags register.

use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::target::{ensure_stopped, RegisterAccess};
use crate::types::{RegisterId, RFLAGS_INTERRUPT_ENABLE};

/// Flags register before and after a toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InterruptToggle
{
    /// Requested state of IF
    pub enabled: bool,
    /// `rflags` before the write
    pub previous: u64,
    /// `rflags` as written
    pub current: u64,
}

/// Set or clear IF (bit 9, `0x200`) in `rflags`, leaving every other bit alone
///
/// ## Errors
///
/// - `TargetRunning`: the target is not halted
/// - `RegisterRead` / `RegisterWrite`: passed through from the host
pub fn set_interrupts<R: RegisterAccess + ?Sized>(registers: &mut R, enabled: bool) -> Result<InterruptToggle>
{
    ensure_stopped(&*registers)?;
    let previous = registers.read_register(RegisterId::Rflags)?;
    let current = if enabled {
        previous | RFLAGS_INTERRUPT_ENABLE
    } else {
        previous & !RFLAGS_INTERRUPT_ENABLE
    };
    registers.write_register(RegisterId::Rflags, current)?;
    info!(enabled, previous, current, "updated rflags");
    Ok(InterruptToggle {
        enabled,
        previous,
        current,
    })
}
