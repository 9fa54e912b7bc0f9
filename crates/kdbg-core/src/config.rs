//! Kernel layout configuration.
//!
//! Names of the kernel globals the commands read, and the structure constants
//! that cannot be recovered without type information. Every field has a
//! default matching the stock kernel, so a layout file only needs the fields
//! that differ.
//!
//! ```rust
//! use kdbg_core::config::KernelLayout;
//!
//! let layout = KernelLayout::from_json(r#"{ "frame_record_size": 8 }"#).unwrap();
//! assert_eq!(layout.frame_record_size, 8);
//! assert_eq!(layout.heap_base_symbol, "kh_base_addr");
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{KdbgError, Result};

/// Symbols and structure constants of the inspected kernel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KernelLayout
{
    /// Pointer variable holding the first heap header
    pub heap_base_symbol: String,
    /// Pointer variable holding the end of the heap
    pub heap_end_symbol: String,
    /// Physical frame allocation-state table
    pub frame_table_symbol: String,
    /// Width of one frame-state record in bytes
    pub frame_record_size: usize,
    /// Scheduler process queue
    pub process_queue_symbol: String,
    /// Offset of the thread queue inside a process structure
    pub thread_queue_offset: u64,
}

impl Default for KernelLayout
{
    fn default() -> Self
    {
        Self {
            heap_base_symbol: "kh_base_addr".to_string(),
            heap_end_symbol: "kh_end_addr".to_string(),
            frame_table_symbol: "phys_alloc_table".to_string(),
            frame_record_size: 1,
            process_queue_symbol: "process_queue".to_string(),
            // pid_t pid, pid_t ppid
            thread_queue_offset: 8,
        }
    }
}

impl KernelLayout
{
    /// Parse a layout from JSON
    pub fn from_json(text: &str) -> Result<Self>
    {
        let layout: Self =
            serde_json::from_str(text).map_err(|err| KdbgError::InvalidArgument(format!("kernel layout: {err}")))?;
        layout.validate()?;
        Ok(layout)
    }

    /// Load a layout file
    pub fn load(path: &Path) -> Result<Self>
    {
        Self::from_json(&fs::read_to_string(path)?)
    }

    fn validate(&self) -> Result<()>
    {
        if self.frame_record_size == 0 {
            return Err(KdbgError::InvalidArgument("frame_record_size must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_empty_json_is_default()
    {
        assert_eq!(KernelLayout::from_json("{}").unwrap(), KernelLayout::default());
    }

    #[test]
    fn test_unknown_field_rejected()
    {
        assert!(KernelLayout::from_json(r#"{ "heap_base": "x" }"#).is_err());
    }

    #[test]
    fn test_zero_record_size_rejected()
    {
        assert!(KernelLayout::from_json(r#"{ "frame_record_size": 0 }"#).is_err());
    }
}
