//! Status codes for resolution and codec operations

use std::fmt;

/// Status code returned by pipeline and codec operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Status {
    /// Operation completed successfully
    #[default]
    Ok = 0,
    /// Operation is pending (async continuation required)
    Pending = 1,
    /// Key was not found
    NotFound = 2,
    /// I/O error occurred
    IoError = 3,
    /// Data corruption detected
    Corruption = 4,
    /// Operation was aborted
    Aborted = 5,
    /// Invalid argument provided
    InvalidArgument = 6,
    /// Invalid operation in current state
    InvalidOperation = 7,
    /// A size limit was exceeded
    ResourceExhausted = 8,
}

impl Status {
    /// Check if the status indicates success
    #[inline]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }

    /// Check if the operation is pending
    #[inline]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Status::Pending)
    }

    /// Check if the key was not found
    #[inline]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Status::NotFound)
    }

    /// Check if the status indicates an error
    #[inline]
    pub const fn is_error(&self) -> bool {
        matches!(
            self,
            Status::IoError
                | Status::Corruption
                | Status::Aborted
                | Status::InvalidArgument
                | Status::InvalidOperation
                | Status::ResourceExhausted
        )
    }

    /// Get the status as a string
    pub const fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "Ok",
            Status::Pending => "Pending",
            Status::NotFound => "NotFound",
            Status::IoError => "IoError",
            Status::Corruption => "Corruption",
            Status::Aborted => "Aborted",
            Status::InvalidArgument => "InvalidArgument",
            Status::InvalidOperation => "InvalidOperation",
            Status::ResourceExhausted => "ResourceExhausted",
        }
    }
}

impl From<&std::io::Error> for Status {
    fn from(_: &std::io::Error) -> Self {
        Status::IoError
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
