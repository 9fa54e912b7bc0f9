//! Target address type.

use std::fmt;
use std::ops::{Add, Sub};

use serde::{Serialize, Serializer};

use crate::error::{KdbgError, Result};

/// Size of a physical page frame in bytes
pub const PAGE_SIZE: u64 = 0x1000;

/// Bits below the page boundary
pub const PAGE_OFFSET_MASK: u64 = PAGE_SIZE - 1;

/// Strongly typed target address
///
/// This wrapper around `u64` keeps addresses apart from sizes, counts and raw
/// register values. Whether the address is physical or virtual is decided by
/// the caller; the relocation helpers in [`crate::relocate`] turn the former
/// into the latter.
///
/// ## Example
///
/// ```rust
/// use kdbg_core::types::Address;
///
/// let addr = Address::from(0x1000);
/// let next_addr = addr + 0x100; // Add offset
/// assert_eq!(next_addr.value(), 0x1100);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(u64);

impl Address
{
    /// The null address (0x0)
    pub const ZERO: Self = Address(0);

    /// Create a new address from a `u64` value
    ///
    /// This is equivalent to `Address::from(value)` but can be used in const contexts.
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Get the raw `u64` value of this address
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Add an offset to this address, checking for overflow
    ///
    /// ```rust
    /// use kdbg_core::types::Address;
    ///
    /// let addr = Address::from(0x1000);
    /// assert_eq!(addr.checked_add(0x100), Some(Address::from(0x1100)));
    /// assert_eq!(addr.checked_add(u64::MAX), None); // Overflow
    /// ```
    pub fn checked_add(self, offset: u64) -> Option<Self>
    {
        self.0.checked_add(offset).map(Address)
    }

    /// Subtract an offset from this address, checking for underflow
    pub fn checked_sub(self, offset: u64) -> Option<Self>
    {
        self.0.checked_sub(offset).map(Address)
    }

    /// Start of the 4 KiB page containing this address
    ///
    /// ```rust
    /// use kdbg_core::types::Address;
    ///
    /// assert_eq!(Address::from(0x1234).page_base(), Address::from(0x1000));
    /// ```
    pub const fn page_base(self) -> Self
    {
        Address(self.0 & !PAGE_OFFSET_MASK)
    }

    /// Whether the address sits on a page boundary
    pub const fn is_page_aligned(self) -> bool
    {
        self.0 & PAGE_OFFSET_MASK == 0
    }

    /// Index of the physical frame containing this address (`address >> 12`)
    pub const fn frame_index(self) -> u64
    {
        self.0 >> 12
    }
}

/// Parse an integer literal: `0x` hex, `0o` octal, `0b` binary or decimal
///
/// Underscores are accepted as digit separators.
///
/// ```rust
/// use kdbg_core::types::address::parse_u64;
///
/// assert_eq!(parse_u64("0xffff_fe00_0000_0000").unwrap(), 0xfffffe0000000000);
/// assert_eq!(parse_u64("4096").unwrap(), 0x1000);
/// assert!(parse_u64("kh_base_addr").is_err());
/// ```
pub fn parse_u64(text: &str) -> Result<u64>
{
    let cleaned = text.trim().replace('_', "");
    let lower = cleaned.to_lowercase();
    let (digits, radix) = if let Some(rest) = lower.strip_prefix("0x") {
        (rest, 16)
    } else if let Some(rest) = lower.strip_prefix("0o") {
        (rest, 8)
    } else if let Some(rest) = lower.strip_prefix("0b") {
        (rest, 2)
    } else {
        (lower.as_str(), 10)
    };
    u64::from_str_radix(digits, radix).map_err(|err| KdbgError::InvalidArgument(format!("{text:?} is not an integer: {err}")))
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:016x}", self.0)
    }
}

impl fmt::LowerHex for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

// Hex string: JSON numbers above 2^53 are lossy in most consumers.
impl Serialize for Address
{
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    {
        serializer.serialize_str(&format!("{:#x}", self.0))
    }
}

impl Add<u64> for Address
{
    type Output = Address;

    fn add(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(rhs))
    }
}

impl Sub<u64> for Address
{
    type Output = Address;

    fn sub(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_sub(rhs))
    }
}
