//! Error taxonomy shared by the kernels, the backends and the host side.
//!
//! Every failure is fatal for the current run: nothing in this crate
//! retries.  [`Error::code`] yields the numeric status that the binary
//! logs next to the message.

use std::fmt;
use std::path::PathBuf;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric status attached to [`Error::Device`].
///
/// The discriminants are the values written to the log.  They follow the
/// OpenCL status numbering where an equivalent exists so that logs from
/// either device read the same way.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    OutOfResources = -5,
    OutOfHostMemory = -6,
    MapFailure = -12,
    InvalidValue = -30,
    InvalidBuffer = -38,
    InvalidKernelName = -46,
    InvalidKernelArgs = -52,
    InvalidWorkGroupSize = -54,
    InvalidGlobalWorkSize = -63,
    Validation = -1000,
    Lost = -1001,
    Timeout = -1002,
    VerificationFailed = -1003,
}

impl DeviceStatus {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?} ({})", self.code())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No adapter was found, or the one found cannot run compute work.
    #[error("compute backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Kernel source failed to build.  `log` holds the diagnostics verbatim.
    #[error("kernel `{kernel}` failed to compile:\n{log}")]
    Compile { kernel: String, log: String },

    #[error("device error {status}: {message}")]
    Device { status: DeviceStatus, message: String },

    #[error("{}", fmt_input(.path, .message))]
    InputFormat {
        path: Option<PathBuf>,
        message: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn fmt_input(path: &Option<PathBuf>, message: &str) -> String {
    match path {
        Some(path) => format!("malformed input {}: {message}", path.display()),
        None => format!("malformed input: {message}"),
    }
}

impl Error {
    pub fn device(status: DeviceStatus, message: impl Into<String>) -> Self {
        Error::Device {
            status,
            message: message.into(),
        }
    }

    pub fn input(message: impl Into<String>) -> Self {
        Error::InputFormat {
            path: None,
            message: message.into(),
        }
    }

    /// Attach the offending file to an [`Error::InputFormat`].  Other
    /// variants pass through untouched.
    pub fn in_file(self, file: impl Into<PathBuf>) -> Self {
        match self {
            Error::InputFormat { path: None, message } => Error::InputFormat {
                path: Some(file.into()),
                message,
            },
            other => other,
        }
    }

    /// Numeric status logged alongside the message.
    pub fn code(&self) -> i32 {
        match self {
            Error::BackendUnavailable(_) => -1,
            Error::Compile { .. } => -11,
            Error::Device { status, .. } => status.code(),
            Error::InputFormat { .. } => -2000,
            Error::Config(_) => -2001,
            Error::Io(_) => -2002,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_status_codes_are_logged() {
        let err = Error::device(DeviceStatus::InvalidKernelName, "no entry point `foo`");
        assert_eq!(err.code(), -46);
        assert!(err.to_string().contains("InvalidKernelName (-46)"));
    }

    #[test]
    fn input_errors_pick_up_the_file_name() {
        let err = Error::input("expected 4 values, found 3").in_file("input.txt");
        assert_eq!(err.to_string(), "malformed input input.txt: expected 4 values, found 3");
        assert_eq!(err.code(), -2000);
    }

    #[test]
    fn compile_errors_carry_the_log() {
        let err = Error::Compile {
            kernel: "block_scan".into(),
            log: "error: expected `;`".into(),
        };
        assert_eq!(err.code(), -11);
        assert!(err.to_string().ends_with("error: expected `;`"));
    }
}
