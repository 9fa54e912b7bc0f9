//! Tests for error handling

use kdbg_core::error::{KdbgError, Result};
use kdbg_core::{Address, RegisterId};

#[test]
fn test_memory_read_message()
{
    let error = KdbgError::MemoryRead {
        address: Address::from(0x1000),
        len: 8,
        details: "not mapped".to_string(),
    };
    let message = format!("{}", error);
    assert!(message.contains("0x0000000000001000"));
    assert!(message.contains("not mapped"));
    assert!(error.is_access_failure());
}

#[test]
fn test_register_errors_name_the_register()
{
    let error = KdbgError::RegisterWrite {
        register: RegisterId::Rflags,
        details: "refused".to_string(),
    };
    assert!(error.to_string().contains("rflags"));
    assert!(error.is_access_failure());
}

#[test]
fn test_precondition_errors_are_not_access_failures()
{
    for error in [
        KdbgError::TargetRunning,
        KdbgError::SymbolNotFound("phys_alloc_table".to_string()),
        KdbgError::Misaligned {
            address: Address::from(0x1008),
            alignment: 0x1000,
        },
    ] {
        assert!(!error.is_access_failure());
    }
}

#[test]
fn test_misaligned_message()
{
    let error = KdbgError::Misaligned {
        address: Address::from(0x1008),
        alignment: 0x1000,
    };
    assert_eq!(
        error.to_string(),
        "Address 0x0000000000001008 is not aligned to 0x1000 bytes"
    );
}

#[test]
fn test_io_error_conversion()
{
    let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
    let error: KdbgError = io_err.into();

    match error {
        KdbgError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
        _ => panic!("Expected Io error"),
    }
}

#[test]
fn test_result_type()
{
    fn returns_ok() -> Result<u64>
    {
        Ok(42)
    }

    fn returns_err() -> Result<u64>
    {
        Err(KdbgError::InvalidArgument("bad".to_string()))
    }

    assert_eq!(returns_ok().unwrap(), 42);
    assert!(returns_err().is_err());
}
