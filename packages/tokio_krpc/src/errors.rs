use std::fmt;
use std::net::SocketAddr;

use failure::{Backtrace, Context, Fail};

#[derive(Debug)]
pub struct Error {
    inner: Context<ErrorKind>,
}

#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum ErrorKind {
    #[fail(display = "no transaction found for reply from {}", from)]
    NoSuchTransaction { from: SocketAddr },

    #[fail(display = "request to {} timed out", to)]
    Timeout { to: SocketAddr },

    #[fail(display = "failed to send datagram to {}: {}", to, cause)]
    SendError { to: SocketAddr, cause: String },

    #[fail(display = "failed to receive datagram: {}", cause)]
    RecvError { cause: String },

    #[fail(display = "request was cancelled")]
    Cancelled,

    #[fail(display = "peer at {} sent a malformed message", from)]
    MalformedMessage { from: SocketAddr },

    #[fail(display = "peer at {} returned a KRPC error: {}", from, error)]
    RemoteError {
        from: SocketAddr,
        error: krpc_encoding::KRPCError,
    },
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
