//! # Commands
//!
//! Every introspection operation as one variant of a closed [`Command`] enum.
//!
//! A command carries its already-evaluated arguments; turning operator text
//! into a `Command` (aliases, symbol expressions) is the host's job. Invoking
//! a command runs against any [`Target`] and produces a [`Report`], which
//! prints the operator-facing text through `Display` and serializes to JSON
//! through serde.
//!
//! ## Example
//!
//! ```rust
//! use kdbg_core::command::{Command, Report};
//! use kdbg_core::config::KernelLayout;
//! use kdbg_core::platform::snapshot::SnapshotTarget;
//!
//! let mut target = SnapshotTarget::new();
//! let report = Command::Relocate { value: 0x1000 }
//!     .invoke(&mut target, &KernelLayout::default())
//!     .unwrap();
//! assert_eq!(report.to_string(), "0xfffffe0000001000");
//! ```

use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::config::KernelLayout;
use crate::error::Result;
use crate::exception::{self, ExceptionFrame};
use crate::frames::{FrameState, FrameStateTable};
use crate::heap::{self, HeapWalk};
use crate::interrupts::{self, InterruptToggle};
use crate::paging::{self, DecodedEntry};
use crate::relocate::{self, Relocation};
use crate::sched::{self, QueueEntry};
use crate::target::Target;
use crate::types::Address;

/// Host capability a command relies on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability
{
    /// Raw memory reads
    Memory,
    /// Register reads (and writes, see [`Command::mutates_registers`])
    Registers,
    /// Symbol resolution
    Symbols,
}

impl fmt::Display for Capability
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Capability::Memory => f.write_str("memory"),
            Capability::Registers => f.write_str("registers"),
            Capability::Symbols => f.write_str("symbols"),
        }
    }
}

/// One introspection operation with its arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command
{
    /// Restore the context saved by an x86-64 exception
    ExcUp,
    /// Dump a paging structure page (PML4T, PDPT, PDT or PT)
    PrintPage
    {
        /// Virtual address of the page
        address: Address,
    },
    /// Current process structure pointer
    ThisProcess,
    /// Current thread structure pointer
    ThisThread,
    /// Walk the kernel heap
    PrintHeap,
    /// Direct-map address of a physical address
    Relocate
    {
        /// Physical address
        value: u64,
    },
    /// Direct-map address of the active PML4T
    Pml4t,
    /// Direct-map address of the page a paging entry points to
    PrintPageIndex
    {
        /// Raw entry value; the flag bits are dropped
        value: u64,
    },
    /// Allocation state of a physical frame
    PageState
    {
        /// Any physical address inside the frame
        address: Address,
    },
    /// Clear IF in the saved flags
    InterruptsOff,
    /// Set IF in the saved flags
    InterruptsOn,
}

impl Command
{
    /// Host-facing command name
    pub const fn name(&self) -> &'static str
    {
        match self {
            Command::ExcUp => "exc-up",
            Command::PrintPage { .. } => "print-page",
            Command::ThisProcess => "this-process",
            Command::ThisThread => "this-thread",
            Command::PrintHeap => "print-heap",
            Command::Relocate { .. } => "relocate",
            Command::Pml4t => "pml4t",
            Command::PrintPageIndex { .. } => "print-page-index",
            Command::PageState { .. } => "page-state",
            Command::InterruptsOff => "int-off",
            Command::InterruptsOn => "int-on",
        }
    }

    /// One-line description
    pub const fn summary(&self) -> &'static str
    {
        match self {
            Command::ExcUp => "Moves up a stack frame that was caused by an x86-64 CPU exception",
            Command::PrintPage { .. } => "Pretty-prints an x86-64 paging structure (PT, PDT, PDPT, or PML4T)",
            Command::ThisProcess => "Prints the address of the current process",
            Command::ThisThread => "Prints the address of the current thread",
            Command::PrintHeap => "Prints the contents of the kernel heap",
            Command::Relocate { .. } => "Prints the virtual address of a physical address",
            Command::Pml4t => "Prints the address of the current PML4T structure",
            Command::PrintPageIndex { .. } => "Prints the address of an index in a page structure",
            Command::PageState { .. } => "Prints the allocation state of a physical page frame",
            Command::InterruptsOff => "Disables hardware interrupts",
            Command::InterruptsOn => "Enables hardware interrupts",
        }
    }

    /// Capabilities `invoke` uses
    pub const fn required_capabilities(&self) -> &'static [Capability]
    {
        match self {
            Command::ExcUp => &[Capability::Memory, Capability::Registers],
            Command::PrintPage { .. } => &[Capability::Memory],
            Command::ThisProcess | Command::ThisThread | Command::PrintHeap | Command::PageState { .. } => {
                &[Capability::Memory, Capability::Symbols]
            }
            Command::Relocate { .. } | Command::PrintPageIndex { .. } => &[],
            Command::Pml4t | Command::InterruptsOff | Command::InterruptsOn => &[Capability::Registers],
        }
    }

    /// Whether `invoke` writes registers
    pub const fn mutates_registers(&self) -> bool
    {
        matches!(self, Command::ExcUp | Command::InterruptsOff | Command::InterruptsOn)
    }

    /// Run the command against `target`
    ///
    /// ## Errors
    ///
    /// Whatever the underlying operation reports. Heap corruption is not an
    /// error; it is part of [`Report::Heap`].
    pub fn invoke<T: Target + ?Sized>(&self, target: &mut T, layout: &KernelLayout) -> Result<Report>
    {
        debug!(command = self.name(), "invoking");
        let report = match *self {
            Command::ExcUp => Report::ExceptionFrame(exception::step_out(target)?),
            Command::PrintPage { address } => Report::PageTable {
                page: address,
                entries: paging::decode(&*target, address)?,
            },
            Command::ThisProcess => {
                Report::CurrentProcess(sched::current_process(&*target, &layout.process_queue_symbol)?)
            }
            Command::ThisThread => Report::CurrentThread(sched::current_thread(
                &*target,
                &layout.process_queue_symbol,
                layout.thread_queue_offset,
            )?),
            Command::PrintHeap => {
                let (base, end) = heap::heap_bounds(&*target, &layout.heap_base_symbol, &layout.heap_end_symbol)?;
                Report::Heap(heap::walk(&*target, base, end)?)
            }
            Command::Relocate { value } => Report::Address(Relocation::of(value)),
            Command::Pml4t => Report::Address(relocate::page_table_root(&*target)?),
            Command::PrintPageIndex { value } => Report::Address(relocate::page_index_address(value)),
            Command::PageState { address } => {
                let table = FrameStateTable::resolve(&*target, &layout.frame_table_symbol, layout.frame_record_size)?;
                Report::FrameState(table.state_of(&*target, address)?)
            }
            Command::InterruptsOff => Report::Interrupts(interrupts::set_interrupts(target, false)?),
            Command::InterruptsOn => Report::Interrupts(interrupts::set_interrupts(target, true)?),
        };
        Ok(report)
    }
}

/// Outcome of a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "report", rename_all = "kebab-case")]
pub enum Report
{
    /// Registers restored by `exc-up`
    ExceptionFrame(ExceptionFrame),
    /// Non-empty entries of a paging structure page
    PageTable
    {
        /// Address the page was read from
        page: Address,
        /// Entries in index order
        entries: Vec<DecodedEntry>,
    },
    /// Front of the process queue
    CurrentProcess(QueueEntry),
    /// Front of the current process's thread queue
    CurrentThread(QueueEntry),
    /// Heap walk, possibly stopped on corruption
    Heap(HeapWalk),
    /// A relocated address
    Address(Relocation),
    /// A frame allocation-state record
    FrameState(FrameState),
    /// New interrupt state
    Interrupts(InterruptToggle),
}

impl Report
{
    /// Heap walk that stopped on corruption, if this report holds one
    pub fn heap_corruption(&self) -> Option<&heap::HeapCorruption>
    {
        match self {
            Report::Heap(walk) => walk.corruption.as_ref(),
            _ => None,
        }
    }
}

impl fmt::Display for Report
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Report::ExceptionFrame(frame) => write!(f, "{frame}"),
            Report::PageTable { entries, .. } => {
                for (i, entry) in entries.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{entry}")?;
                }
                Ok(())
            }
            Report::CurrentProcess(entry) => write_queue_entry(f, "process", entry),
            Report::CurrentThread(entry) => write_queue_entry(f, "thread", entry),
            Report::Heap(walk) => {
                for block in &walk.blocks {
                    writeln!(f, "{block}")?;
                }
                if let Some(corruption) = &walk.corruption {
                    writeln!(f, "{corruption}")?;
                }
                write!(f, "{} objects total", walk.count())
            }
            Report::Address(relocation) => {
                write!(f, "{:#x}", relocation.virtual_address)?;
                if !relocation.in_window {
                    write!(f, " (warning: {:#x} is outside the direct map)", relocation.physical)?;
                }
                Ok(())
            }
            Report::FrameState(state) => write!(f, "{state}"),
            Report::Interrupts(toggle) => write!(
                f,
                "interrupts {} (eflags {:#x} -> {:#x})",
                if toggle.enabled { "enabled" } else { "disabled" },
                toggle.previous,
                toggle.current
            ),
        }
    }
}

fn write_queue_entry(f: &mut fmt::Formatter<'_>, what: &str, entry: &QueueEntry) -> fmt::Result
{
    write!(
        f,
        "current {what}: {:#x} (queue[{}] of {})",
        entry.pointer, entry.queue.front, entry.queue.len
    )
}
