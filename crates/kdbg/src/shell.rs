//! Command table, aliases and argument evaluation.
//!
//! Turns operator words such as `ppage kh_base_addr+0x1000` into a
//! [`Command`]. Arguments are evaluated against the target before the command
//! runs:
//!
//! - integer literals: `0x1000`, `0o10`, `0b1`, `4096` (`_` separators allowed)
//! - symbols: `phys_alloc_table`, resolved through the symbol table
//! - registers: `$cr3`, `$rsp`
//! - any of the above plus an offset: `process_queue+8`, `$rsp + 0x18`

use std::collections::HashMap;

use kdbg_core::types::address::parse_u64;
use kdbg_core::{Address, Command, KdbgError, RegisterAccess, RegisterId, Result, SymbolResolver};
use once_cell::sync::Lazy;

/// One entry of the command table
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec
{
    /// Command with placeholder arguments
    pub template: Command,
    /// Short alias
    pub alias: Option<&'static str>,
    /// Name of the single argument, for commands that take one
    pub argument: Option<&'static str>,
}

impl CommandSpec
{
    pub const fn name(&self) -> &'static str
    {
        self.template.name()
    }
}

/// Every command the shell knows, in listing order
pub static COMMANDS: [CommandSpec; 11] = [
    CommandSpec {
        template: Command::ExcUp,
        alias: None,
        argument: None,
    },
    CommandSpec {
        template: Command::PrintPage { address: Address::ZERO },
        alias: Some("ppage"),
        argument: Some("address"),
    },
    CommandSpec {
        template: Command::ThisProcess,
        alias: Some("thpr"),
        argument: None,
    },
    CommandSpec {
        template: Command::ThisThread,
        alias: Some("thtd"),
        argument: None,
    },
    CommandSpec {
        template: Command::PrintHeap,
        alias: Some("ph"),
        argument: None,
    },
    CommandSpec {
        template: Command::Relocate { value: 0 },
        alias: None,
        argument: Some("value"),
    },
    CommandSpec {
        template: Command::Pml4t,
        alias: None,
        argument: None,
    },
    CommandSpec {
        template: Command::PrintPageIndex { value: 0 },
        alias: Some("ppi"),
        argument: Some("entry"),
    },
    CommandSpec {
        template: Command::PageState { address: Address::ZERO },
        alias: Some("ps"),
        argument: Some("address"),
    },
    CommandSpec {
        template: Command::InterruptsOff,
        alias: None,
        argument: None,
    },
    CommandSpec {
        template: Command::InterruptsOn,
        alias: None,
        argument: None,
    },
];

// Names and aliases share one namespace.
static LOOKUP: Lazy<HashMap<&'static str, &'static CommandSpec>> = Lazy::new(|| {
    let mut table = HashMap::new();
    for spec in &COMMANDS {
        table.insert(spec.name(), spec);
        if let Some(alias) = spec.alias {
            table.insert(alias, spec);
        }
    }
    table
});

/// Find a command by name or alias
pub fn lookup(word: &str) -> Option<&'static CommandSpec>
{
    LOOKUP.get(word).copied()
}

/// Build a command from its name and argument words
///
/// Argument words are joined, so `kh_base_addr + 16` and `kh_base_addr+16`
/// are the same expression.
pub fn parse_command<T>(word: &str, args: &[String], target: &T) -> Result<Command>
where
    T: RegisterAccess + SymbolResolver + ?Sized,
{
    let spec = lookup(word).ok_or_else(|| KdbgError::InvalidArgument(format!("unknown command: {word}")))?;
    let expression = args.join(" ");

    let Some(argument) = spec.argument else {
        if !expression.trim().is_empty() {
            return Err(KdbgError::InvalidArgument(format!("{} takes no arguments", spec.name())));
        }
        return Ok(spec.template);
    };
    if expression.trim().is_empty() {
        return Err(KdbgError::InvalidArgument(format!("usage: {} <{argument}>", spec.name())));
    }

    let value = evaluate(&expression, target)?;
    Ok(match spec.template {
        Command::PrintPage { .. } => Command::PrintPage { address: Address::from(value) },
        Command::Relocate { .. } => Command::Relocate { value },
        Command::PrintPageIndex { .. } => Command::PrintPageIndex { value },
        Command::PageState { .. } => Command::PageState { address: Address::from(value) },
        other => other,
    })
}

/// Evaluate `term` or `term + offset`
pub fn evaluate<T>(expression: &str, target: &T) -> Result<u64>
where
    T: RegisterAccess + SymbolResolver + ?Sized,
{
    let (base, offset) = match expression.split_once('+') {
        Some((base, offset)) => (base.trim(), Some(offset.trim())),
        None => (expression.trim(), None),
    };

    let base = term(base, target)?;
    let Some(offset) = offset else {
        return Ok(base);
    };
    let offset = parse_u64(offset)?;
    base.checked_add(offset)
        .ok_or_else(|| KdbgError::InvalidArgument(format!("{expression} overflows 64 bits")))
}

fn term<T>(text: &str, target: &T) -> Result<u64>
where
    T: RegisterAccess + SymbolResolver + ?Sized,
{
    if text.starts_with('$') {
        let id: RegisterId = text.parse()?;
        return target.read_register(id);
    }
    if text.starts_with(|c: char| c.is_ascii_digit()) {
        return parse_u64(text);
    }
    if text.is_empty() {
        return Err(KdbgError::InvalidArgument("missing operand".to_string()));
    }
    target.resolve_symbol(text).map(Address::value)
}
