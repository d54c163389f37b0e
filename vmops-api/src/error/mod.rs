//! Error handling module for the VMOPS benchmark

use core::fmt;

/// Common error type used throughout the VMOPS workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid argument passed to a backend operation
    InvalidArguments(String),
    /// The backend ran out of memory or address space
    OutOfMemory,
    /// Memory object creation failed
    CreationFailed {
        /// Object name
        name: String,
        /// OS error number, 0 when unknown
        errno: i32,
    },
    /// Mapping failed
    MapFailed {
        /// Requested address, 0 when the OS chooses
        addr: usize,
        /// OS error number, 0 when unknown
        errno: i32,
    },
    /// Protection change failed
    ProtectFailed {
        /// Region start
        addr: usize,
        /// OS error number, 0 when unknown
        errno: i32,
    },
    /// Unmapping failed
    UnmapFailed {
        /// Region start
        addr: usize,
        /// OS error number, 0 when unknown
        errno: i32,
    },
    /// Configuration error
    InvalidConfig(String),
    /// Topology discovery error
    Topology(String),
    /// A worker thread could not be started
    ThreadSpawn(String),
    /// The barrier was aborted while waiting
    BarrierAborted,
    /// I/O error
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArguments(msg) => write!(f, "Invalid arguments: {}", msg),
            Error::OutOfMemory => write!(f, "Out of memory"),
            Error::CreationFailed { name, errno } => {
                write!(f, "Memory object creation failed: {} (errno {})", name, errno)
            }
            Error::MapFailed { addr, errno } => {
                write!(f, "Map failed at {:#x} (errno {})", addr, errno)
            }
            Error::ProtectFailed { addr, errno } => {
                write!(f, "Protect failed at {:#x} (errno {})", addr, errno)
            }
            Error::UnmapFailed { addr, errno } => {
                write!(f, "Unmap failed at {:#x} (errno {})", addr, errno)
            }
            Error::InvalidConfig(msg) => write!(f, "Configuration error: {}", msg),
            Error::Topology(msg) => write!(f, "Topology error: {}", msg),
            Error::ThreadSpawn(msg) => write!(f, "Thread spawn failed: {}", msg),
            Error::BarrierAborted => write!(f, "Barrier aborted"),
            Error::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

/// Result type for operations that can fail
pub type Result<T> = core::result::Result<T, Error>;

/// Error context trait for adding context to errors
pub trait ErrorContext<T> {
    /// Prefixes the message of message-carrying errors with `context`
    fn context(self, context: &str) -> Result<T>;
}

impl<T> ErrorContext<T> for Result<T> {
    fn context(self, context: &str) -> Result<T> {
        self.map_err(|error| match error {
            Error::InvalidArguments(msg) => Error::InvalidArguments(format!("{}: {}", context, msg)),
            Error::InvalidConfig(msg) => Error::InvalidConfig(format!("{}: {}", context, msg)),
            Error::Topology(msg) => Error::Topology(format!("{}: {}", context, msg)),
            Error::ThreadSpawn(msg) => Error::ThreadSpawn(format!("{}: {}", context, msg)),
            Error::Io(msg) => Error::Io(format!("{}: {}", context, msg)),
            other => other,
        })
    }
}

/// Creates a new invalid arguments error
pub fn invalid_arguments(msg: &str) -> Error {
    Error::InvalidArguments(msg.to_string())
}

/// Creates a new configuration error
pub fn invalid_config(msg: &str) -> Error {
    Error::InvalidConfig(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_prefixes_message() {
        let res: Result<()> = Err(invalid_config("memsize must be a power of two"));
        let err = res.context("--memsize").unwrap_err();
        assert_eq!(
            err,
            Error::InvalidConfig("--memsize: memsize must be a power of two".to_string())
        );
    }

    #[test]
    fn test_context_keeps_backend_errors() {
        let res: Result<()> = Err(Error::MapFailed { addr: 0x1000, errno: 12 });
        let err = res.context("map").unwrap_err();
        assert_eq!(err, Error::MapFailed { addr: 0x1000, errno: 12 });
    }

    #[test]
    fn test_display() {
        let err = Error::UnmapFailed { addr: 0x2000, errno: 22 };
        assert_eq!(err.to_string(), "Unmap failed at 0x2000 (errno 22)");
    }
}
