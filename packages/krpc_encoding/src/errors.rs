use std::fmt;

use failure::{Backtrace, Context, Fail};

/// Errors produced while encoding or decoding KRPC messages.
#[derive(Debug)]
pub struct Error {
    inner: Context<ErrorKind>,
}

#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum ErrorKind {
    #[fail(display = "message failed to decode as bencode: {}", cause)]
    DecodeError { cause: String },

    #[fail(display = "message failed to encode as bencode: {}", cause)]
    EncodeError { cause: String },

    #[fail(display = "message was structurally invalid: {}", reason)]
    MalformedMessage { reason: String },

    #[fail(display = "unrecognized query kind: {}", kind)]
    UnknownQueryKind { kind: String },

    #[fail(display = "message violated the KRPC protocol: {}", reason)]
    ProtocolError { reason: String },
}

impl Fail for Error {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.inner.backtrace()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.inner.get_context()
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error {
            inner: Context::new(kind),
        }
    }
}

impl From<Context<ErrorKind>> for Error {
    fn from(inner: Context<ErrorKind>) -> Error {
        Error { inner }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
