// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Vendor WMAX calls through the `acpi_call` kernel module.
//!
//! A call is a single line written to `/proc/acpi/call`:
//!
//! ```text
//! \_SB.AMWW.WMAX 0 0x15 {0x01, 0xa0, 0x00, 0x00}
//! ```
//!
//! and the firmware's answer is read back from the same file. Every code and
//! argument is checked against a `0x`-prefixed hex literal before anything
//! reaches the kernel's ACPI interpreter.

use std::fs;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Default location of the `acpi_call` control file.
pub const ACPI_CALL_PATH: &str = "/proc/acpi/call";

/// ACPI object path of the Alienware/Dell WMAX method.
pub const WMAX_METHOD: &str = r"\_SB.AMWW.WMAX";

/// The WMAX method always takes exactly four argument bytes.
pub const WMAX_ARITY: usize = 4;

/// Longest hex literal accepted as a code or argument (`0x` + 8 digits).
const MAX_HEX_LEN: usize = 10;

/// WMAX sub-functions used by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WmaxFunction {
    /// `{0x04, sensor}` temperature, `{0x05, fan}` fan RPM.
    SensorQuery,
    /// `{0x01, mode}` power mode, `{0x02, fan, pct}` fan boost.
    ThermalControl,
    /// `{0x01, on/off}` set, `{0x02}` query.
    GMode,
    /// `{0x02, 0x02}` returns the board revision.
    ModelQuery,
}

impl WmaxFunction {
    pub fn code(self) -> u8 {
        match self {
            WmaxFunction::SensorQuery => 0x14,
            WmaxFunction::ThermalControl => 0x15,
            WmaxFunction::GMode => 0x25,
            WmaxFunction::ModelQuery => 0x1a,
        }
    }
}

#[derive(Debug, Error)]
pub enum AcpiError {
    #[error("invalid hex literal {0:?}")]
    InvalidHex(String),

    #[error("too many arguments ({0}, max 4)")]
    TooManyArgs(usize),

    #[error("unparseable ACPI result {0:?}")]
    BadResult(String),

    #[error("ACPI call failed: {0}")]
    Io(#[from] io::Error),
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Returns true if `s` is a `0x`-prefixed hex literal of bounded length.
pub fn is_hex_literal(s: &str) -> bool {
    match s.strip_prefix("0x") {
        Some(digits) => {
            !digits.is_empty()
                && s.len() <= MAX_HEX_LEN
                && digits.chars().all(|c| c.is_ascii_hexdigit())
        }
        None => false,
    }
}

/// Format a byte the way the firmware tables write it (`0x0a`).
pub fn hex_byte(value: u8) -> String {
    format!("0x{value:02x}")
}

/// Build the command line for a WMAX call, validating every literal and
/// zero-padding the argument list to [`WMAX_ARITY`].
pub fn encode_command(code: &str, args: &[&str]) -> Result<String, AcpiError> {
    if !is_hex_literal(code) {
        return Err(AcpiError::InvalidHex(code.to_string()));
    }
    if args.len() > WMAX_ARITY {
        return Err(AcpiError::TooManyArgs(args.len()));
    }
    if let Some(bad) = args.iter().find(|a| !is_hex_literal(a)) {
        return Err(AcpiError::InvalidHex(bad.to_string()));
    }

    let mut padded: Vec<&str> = args.to_vec();
    padded.resize(WMAX_ARITY, "0x00");

    Ok(format!("{WMAX_METHOD} 0 {code} {{{}}}", padded.join(", ")))
}

/// Reduce the raw text read back from `acpi_call` to a single hex literal.
///
/// Buffer results (`{0x01, 0x00, ...}`) collapse to their first element and an
/// empty answer reads as `0x0`.
pub fn normalize_result(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('\0');
    let first = if trimmed.starts_with('{') {
        trimmed
            .trim_matches(|c| c == '{' || c == '}')
            .split(',')
            .next()
            .unwrap_or("")
            .trim()
    } else {
        trimmed
    };

    if first.is_empty() {
        "0x0".to_string()
    } else {
        first.to_string()
    }
}

/// Parse a normalized result as an unsigned integer.
pub fn parse_result(result: &str) -> Result<u32, AcpiError> {
    let digits = result
        .strip_prefix("0x")
        .ok_or_else(|| AcpiError::BadResult(result.to_string()))?;
    u32::from_str_radix(digits, 16).map_err(|_| AcpiError::BadResult(result.to_string()))
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Something that can execute an encoded WMAX command line.
///
/// The daemon uses [`ProcAcpiCall`]; tests substitute a recorder.
pub trait AcpiTransport: Send {
    /// Issue `command` and return the raw text the firmware answered with.
    fn execute(&mut self, command: &str) -> io::Result<String>;
}

/// Transport backed by the `acpi_call` proc file.
#[derive(Debug, Clone)]
pub struct ProcAcpiCall {
    path: PathBuf,
}

impl ProcAcpiCall {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for ProcAcpiCall {
    fn default() -> Self {
        Self::new(ACPI_CALL_PATH)
    }
}

impl AcpiTransport for ProcAcpiCall {
    fn execute(&mut self, command: &str) -> io::Result<String> {
        fs::write(&self.path, command)?;
        fs::read_to_string(&self.path)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::AcpiTransport;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::{Arc, Mutex};

    /// Records every command and answers from a scripted queue (or `0x0`).
    #[derive(Clone, Default)]
    pub struct RecordingTransport {
        pub calls: Arc<Mutex<Vec<String>>>,
        pub replies: Arc<Mutex<VecDeque<io::Result<String>>>>,
        pub fail_all: bool,
    }

    impl RecordingTransport {
        pub fn failing() -> Self {
            Self {
                fail_all: true,
                ..Self::default()
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn clear(&self) {
            self.calls.lock().unwrap().clear();
        }

        pub fn push_reply(&self, reply: &str) {
            self.replies.lock().unwrap().push_back(Ok(reply.to_string()));
        }
    }

    impl AcpiTransport for RecordingTransport {
        fn execute(&mut self, command: &str) -> io::Result<String> {
            self.calls.lock().unwrap().push(command.to_string());
            if self.fail_all {
                return Err(io::Error::other("no firmware"));
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("0x0".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_pads_to_four_args() {
        let cmd = encode_command("0x15", &["0x01", "0xa0"]).unwrap();
        assert_eq!(cmd, r"\_SB.AMWW.WMAX 0 0x15 {0x01, 0xa0, 0x00, 0x00}");
    }

    #[test]
    fn test_encode_without_args() {
        let cmd = encode_command("0x1a", &[]).unwrap();
        assert_eq!(cmd, r"\_SB.AMWW.WMAX 0 0x1a {0x00, 0x00, 0x00, 0x00}");
    }

    #[test]
    fn test_encode_rejects_malformed_literals() {
        assert!(matches!(
            encode_command("15", &[]),
            Err(AcpiError::InvalidHex(_))
        ));
        assert!(matches!(
            encode_command("0x15", &["0x01", "1; echo"]),
            Err(AcpiError::InvalidHex(_))
        ));
        assert!(matches!(
            encode_command("0x15", &["0x"]),
            Err(AcpiError::InvalidHex(_))
        ));
        assert!(matches!(
            encode_command("0x15", &["0x01}"]),
            Err(AcpiError::InvalidHex(_))
        ));
        assert!(matches!(
            encode_command("0x15", &["0x1", "0x1", "0x1", "0x1", "0x1"]),
            Err(AcpiError::TooManyArgs(5))
        ));
    }

    #[test]
    fn test_hex_literal_length_is_bounded() {
        assert!(is_hex_literal("0xdeadbeef"));
        assert!(!is_hex_literal("0xdeadbeef00"));
    }

    #[test]
    fn test_normalize_result() {
        assert_eq!(normalize_result("0x2d\n"), "0x2d");
        assert_eq!(normalize_result("{0x01, 0x00, 0x00}"), "0x01");
        assert_eq!(normalize_result(""), "0x0");
        assert_eq!(normalize_result("0x5\0"), "0x5");
    }

    #[test]
    fn test_parse_result() {
        assert_eq!(parse_result("0x2d").unwrap(), 45);
        assert!(parse_result("Error: AE_NOT_FOUND").is_err());
        assert!(parse_result("0xzz").is_err());
    }

    #[test]
    fn test_proc_transport_writes_then_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("call");
        let mut transport = ProcAcpiCall::new(&path);
        let out = transport.execute("0x1").unwrap();
        // A plain file echoes the command back, which is enough to see both halves run.
        assert_eq!(out, "0x1");
    }
}
