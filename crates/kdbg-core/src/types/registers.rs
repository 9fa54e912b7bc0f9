//! CPU register identifiers and register snapshots.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use super::address::parse_u64;
use crate::error::KdbgError;

/// Interrupt-enable flag (IF) in RFLAGS
pub const RFLAGS_INTERRUPT_ENABLE: u64 = 0x200;

/// Identifier for an x86-64 register the introspection commands touch
///
/// Only the registers that appear in an exception frame, plus the page-table
/// base register, are modelled. Everything else stays with the host.
///
/// ## Example
///
/// ```rust
/// use kdbg_core::types::RegisterId;
///
/// let flags: RegisterId = "eflags".parse().unwrap();
/// assert_eq!(flags, RegisterId::Rflags);
/// assert_eq!(flags.name(), "rflags");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterId
{
    /// RIP - instruction pointer
    Rip,
    /// RSP - stack pointer
    Rsp,
    /// RFLAGS - flags register (`eflags` in most debugger front ends)
    #[serde(alias = "eflags")]
    Rflags,
    /// CS - code segment selector
    Cs,
    /// SS - stack segment selector
    Ss,
    /// CR3 - physical address of the top-level page table (plus PCID bits)
    Cr3,
}

impl RegisterId
{
    /// Every register known to the core, in display order
    pub const ALL: [RegisterId; 6] = [
        RegisterId::Rip,
        RegisterId::Cs,
        RegisterId::Rflags,
        RegisterId::Rsp,
        RegisterId::Ss,
        RegisterId::Cr3,
    ];

    /// Canonical lowercase name
    pub const fn name(self) -> &'static str
    {
        match self {
            RegisterId::Rip => "rip",
            RegisterId::Rsp => "rsp",
            RegisterId::Rflags => "rflags",
            RegisterId::Cs => "cs",
            RegisterId::Ss => "ss",
            RegisterId::Cr3 => "cr3",
        }
    }
}

impl fmt::Display for RegisterId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.name())
    }
}

impl FromStr for RegisterId
{
    type Err = KdbgError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.trim_start_matches('$').to_lowercase().as_str() {
            "rip" | "pc" => Ok(RegisterId::Rip),
            "rsp" | "sp" => Ok(RegisterId::Rsp),
            "rflags" | "eflags" => Ok(RegisterId::Rflags),
            "cs" => Ok(RegisterId::Cs),
            "ss" => Ok(RegisterId::Ss),
            "cr3" => Ok(RegisterId::Cr3),
            _ => Err(KdbgError::InvalidArgument(format!("unknown register: {s}"))),
        }
    }
}

/// Snapshot of register values keyed by [`RegisterId`]
///
/// Missing registers are simply absent; reading one is the host's problem to
/// report (see [`crate::platform::snapshot::SnapshotTarget`]).
///
/// Deserializes from a JSON object whose values are numbers or integer
/// literal strings (`"0xfffffe0000001000"`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RegisterSet(BTreeMap<RegisterId, u64>);

impl<'de> Deserialize<'de> for RegisterSet
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error>
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawValue
        {
            Number(u64),
            Text(String),
        }

        let raw = BTreeMap::<RegisterId, RawValue>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(id, value)| match value {
                RawValue::Number(number) => Ok((id, number)),
                RawValue::Text(text) => parse_u64(&text).map(|number| (id, number)).map_err(D::Error::custom),
            })
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map(RegisterSet)
    }
}

impl RegisterSet
{
    /// Create an empty register set
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Builder-style insert
    #[must_use]
    pub fn with(mut self, id: RegisterId, value: u64) -> Self
    {
        self.0.insert(id, value);
        self
    }

    /// Value of a register, if present
    pub fn get(&self, id: RegisterId) -> Option<u64>
    {
        self.0.get(&id).copied()
    }

    /// Set a register, returning the previous value
    pub fn set(&mut self, id: RegisterId, value: u64) -> Option<u64>
    {
        self.0.insert(id, value)
    }
}
