//! Physical frame allocation-state lookup.
//!
//! The kernel keeps one record per physical page frame in a global table
//! indexed by `address >> 12`. The core treats a record as opaque bytes of a
//! configured width; interpreting them is left to the presentation layer.

use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::error::{KdbgError, Result};
use crate::target::{MemoryAccess, SymbolResolver};
use crate::types::Address;

/// Location and record width of the frame-state table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStateTable
{
    base: Address,
    record_size: usize,
}

impl FrameStateTable
{
    /// Describe a table already located in memory
    ///
    /// ## Errors
    ///
    /// - `InvalidArgument`: `record_size` is zero
    pub fn new(base: Address, record_size: usize) -> Result<Self>
    {
        if record_size == 0 {
            return Err(KdbgError::InvalidArgument("frame record size must be non-zero".into()));
        }
        Ok(Self { base, record_size })
    }

    /// Locate the table through its kernel symbol
    ///
    /// ## Errors
    ///
    /// - `SymbolNotFound`: the table symbol is missing. There is no fallback
    ///   address; dereferencing a guessed base would report another table's
    ///   bytes as frame state.
    pub fn resolve<S: SymbolResolver + ?Sized>(symbols: &S, symbol: &str, record_size: usize) -> Result<Self>
    {
        let base = symbols.resolve_symbol(symbol)?;
        Self::new(base, record_size)
    }

    /// Address of the record for `frame_index`
    pub fn record_address(&self, frame_index: u64) -> Result<Address>
    {
        frame_index
            .checked_mul(self.record_size as u64)
            .and_then(|offset| self.base.checked_add(offset))
            .ok_or_else(|| KdbgError::InvalidArgument(format!("frame index {frame_index:#x} is outside the table")))
    }

    /// Read the record describing the frame that contains `physical`
    pub fn state_of<M: MemoryAccess + ?Sized>(&self, memory: &M, physical: Address) -> Result<FrameState>
    {
        let frame_index = physical.frame_index();
        let record_address = self.record_address(frame_index)?;
        let record = memory.read_memory(record_address, self.record_size)?;
        debug!(%physical, frame_index, record = %record_address, "read frame state");
        Ok(FrameState {
            physical,
            frame_index,
            record_address,
            record,
        })
    }
}

/// Allocation-state record of one physical frame, returned unmodified
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameState
{
    /// Address that was looked up
    pub physical: Address,
    /// `physical >> 12`
    pub frame_index: u64,
    /// Where the record lives
    pub record_address: Address,
    /// Raw record bytes
    pub record: Vec<u8>,
}

impl FrameState
{
    /// Record interpreted as a little-endian integer, when it fits in 64 bits
    pub fn value(&self) -> Option<u64>
    {
        if self.record.len() > 8 {
            return None;
        }
        let mut word = [0u8; 8];
        word[..self.record.len()].copy_from_slice(&self.record);
        Some(u64::from_le_bytes(word))
    }
}

impl fmt::Display for FrameState
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "frame {:#x} (record at {:#x}) = ", self.frame_index, self.record_address)?;
        match self.value() {
            Some(value) => write!(f, "{value} ({value:#x})"),
            None => {
                for (i, byte) in self.record.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_record_address_scales_by_width()
    {
        let table = FrameStateTable::new(Address::from(0x10_0000), 8).unwrap();
        assert_eq!(table.record_address(0x203).unwrap(), Address::from(0x10_0000 + 0x203 * 8));
    }

    #[test]
    fn test_record_address_overflow()
    {
        let table = FrameStateTable::new(Address::from(u64::MAX - 4), 1).unwrap();
        assert!(table.record_address(16).is_err());
    }

    #[test]
    fn test_zero_width_rejected()
    {
        assert!(FrameStateTable::new(Address::from(0x1000), 0).is_err());
    }

    #[test]
    fn test_display_small_and_wide_records()
    {
        let small = FrameState {
            physical: Address::from(0x3000),
            frame_index: 3,
            record_address: Address::from(0x8003),
            record: vec![1],
        };
        assert_eq!(small.to_string(), "frame 0x3 (record at 0x8003) = 1 (0x1)");

        let wide = FrameState {
            record: vec![0xab; 10],
            ..small
        };
        assert!(wide.value().is_none());
        assert!(wide.to_string().ends_with("ab ab ab ab ab ab ab ab ab ab"));
    }
}
