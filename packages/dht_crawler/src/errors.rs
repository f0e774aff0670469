use std::fmt;

use failure::{Backtrace, Context, Fail};

#[derive(Debug)]
pub struct Error {
    inner: Context<ErrorKind>,
}

#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum ErrorKind {
    #[fail(display = "invalid infohash: {}", reason)]
    InvalidInfoHash { reason: String },

    #[fail(display = "invalid configuration: {}", reason)]
    InvalidConfig { reason: String },

    #[fail(display = "failed to bind UDP socket on port {}: {}", port, cause)]
    BindFailed { port: u16, cause: String },

    #[fail(display = "ambiguous bootstrap router address: {}", addr)]
    AmbiguousRouter { addr: String },

    #[fail(display = "node was asked to do something after Stop()")]
    Stopped,

    #[fail(display = "transport error: {}", cause)]
    Transport { cause: String },

    #[fail(display = "codec error: {}", cause)]
    Codec { cause: String },
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

impl From<krpc_encoding::Error> for Error {
    fn from(e: krpc_encoding::Error) -> Error {
        ErrorKind::Codec {
            cause: e.to_string(),
        }
        .into()
    }
}

impl From<tokio_krpc::Error> for Error {
    fn from(e: tokio_krpc::Error) -> Error {
        ErrorKind::Transport {
            cause: e.to_string(),
        }
        .into()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
