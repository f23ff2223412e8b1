//! gRPC status codes.

use std::fmt;

/// gRPC status codes (different from HTTP status codes).
///
/// `LocalError` never appears on the wire: it marks calls that failed on
/// this side before the server produced an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Code {
    /// The call failed locally (no session, connect or transport failure).
    LocalError = -1,
    /// The operation completed successfully.
    Ok = 0,
    /// The operation was cancelled.
    Cancelled = 1,
    /// Unknown error.
    Unknown = 2,
    /// Invalid argument was provided.
    InvalidArgument = 3,
    /// Deadline expired before operation could complete.
    DeadlineExceeded = 4,
    /// Requested entity was not found.
    NotFound = 5,
    /// Entity already exists.
    AlreadyExists = 6,
    /// Permission denied.
    PermissionDenied = 7,
    /// Resource has been exhausted.
    ResourceExhausted = 8,
    /// Operation was rejected because the system is not in a state required for execution.
    FailedPrecondition = 9,
    /// Operation was aborted.
    Aborted = 10,
    /// Operation was attempted past the valid range.
    OutOfRange = 11,
    /// Operation is not implemented or supported.
    Unimplemented = 12,
    /// Internal error.
    Internal = 13,
    /// Service is currently unavailable.
    Unavailable = 14,
    /// Unrecoverable data loss or corruption.
    DataLoss = 15,
    /// Request does not have valid authentication credentials.
    Unauthenticated = 16,
}

const MIN_CODE: i32 = -1;
const MAX_CODE: i32 = 16;

/// Display names indexed by `code + 1`.
const NAMES: [&str; 18] = [
    "Local Error",
    "Ok",
    "Cancelled",
    "Unknown",
    "Invalid Argument",
    "Deadline Exceeded",
    "Not Found",
    "Already Exists",
    "Permission Denied",
    "Resource Exhausted",
    "Failed Precondition",
    "Aborted",
    "Out of Range",
    "Unimplemented",
    "Internal",
    "Unavailable",
    "Data Loss",
    "Unauthenticated",
];

/// Human-readable name of a raw status value.
pub fn describe(value: i32) -> &'static str {
    if !(MIN_CODE..=MAX_CODE).contains(&value) {
        return "Unknown error (invalid status)";
    }
    NAMES[(value - MIN_CODE) as usize]
}

impl Code {
    /// Create a Code from its numeric value, `None` if out of range.
    pub fn from_i32(value: i32) -> Option<Self> {
        let code = match value {
            -1 => Code::LocalError,
            0 => Code::Ok,
            1 => Code::Cancelled,
            2 => Code::Unknown,
            3 => Code::InvalidArgument,
            4 => Code::DeadlineExceeded,
            5 => Code::NotFound,
            6 => Code::AlreadyExists,
            7 => Code::PermissionDenied,
            8 => Code::ResourceExhausted,
            9 => Code::FailedPrecondition,
            10 => Code::Aborted,
            11 => Code::OutOfRange,
            12 => Code::Unimplemented,
            13 => Code::Internal,
            14 => Code::Unavailable,
            15 => Code::DataLoss,
            16 => Code::Unauthenticated,
            _ => return None,
        };
        Some(code)
    }

    /// Get the numeric value of this code.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_ok(self) -> bool {
        self == Code::Ok
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(describe(self.as_i32()))
    }
}

/// gRPC status returned from an RPC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    code: Code,
    message: Option<String>,
}

impl Status {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    pub fn from_code(code: Code) -> Self {
        Self {
            code,
            message: None,
        }
    }

    /// A failure that never reached the server.
    pub fn local(message: impl Into<String>) -> Self {
        Self::new(Code::LocalError, message)
    }

    /// Status for a raw `grpc-status` value and optional `grpc-message`.
    pub fn from_wire(value: u32, message: Option<String>) -> Self {
        match i32::try_from(value).ok().and_then(Code::from_i32) {
            Some(code) => Self { code, message },
            None => Self {
                code: Code::Unknown,
                message: Some(describe(i32::MAX).to_string()),
            },
        }
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn is_ok(&self) -> bool {
        self.code.is_ok()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)?;
        if let Some(msg) = &self.message {
            write!(f, ": {}", msg)?;
        }
        Ok(())
    }
}

impl std::error::Error for Status {}
