use std::fmt::{Display, Formatter};
use std::io::ErrorKind;
use std::net::AddrParseError;
use std::string::FromUtf8Error;

/// Errors that arise from pipeline composition, reads, writes or connects
#[derive(Debug, Eq, PartialEq, Clone)]
pub struct Error {
    /// A list specifying general categories of [Error].
    pub kind: ErrorKind,
    /// A message describing error information
    pub message: String,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} , {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl From<AddrParseError> for Error {
    fn from(e: AddrParseError) -> Self {
        Error {
            kind: ErrorKind::AddrNotAvailable,
            message: e.to_string(),
        }
    }
}

impl From<FromUtf8Error> for Error {
    fn from(e: FromUtf8Error) -> Self {
        Error {
            kind: ErrorKind::InvalidData,
            message: e.to_string(),
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        std::io::Error::new(e.kind, e.message)
    }
}

impl Error {
    /// Creates a new error from a known kind of error as well as a message.
    pub fn new(kind: ErrorKind, message: String) -> Self {
        Error { kind, message }
    }
}
