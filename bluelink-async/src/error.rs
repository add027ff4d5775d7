//! Failures of the futures and channels in this crate.
//!
//! Most errors are a [`bluelink::Error`] handed back by the link: a refused request, a failed
//! connection attempt or a failed write. The rest come from the async layer itself, when a
//! future loses the attempt it was waiting on or a channel reader falls behind.

use std::fmt::Display;

use futures_channel::oneshot;

pub type Result<T> = std::result::Result<T, Error>;

/// Why a [`LinkAsync`](crate::LinkAsync) future or receiver gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    data: ErrorData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    /// The link refused the request or reported the attempt as failed.
    Link(bluelink::ErrorKind),
    /// The attempt or write being waited on ended without an outcome. A newer `connect`
    /// replaced it, it was disconnected before becoming ready, or the link was dropped.
    Canceled,
    /// A broadcast receiver fell behind and missed values.
    Lagged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ErrorData {
    Link(bluelink::Error),
    Local(ErrorKind),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.data {
            ErrorData::Link(error) => error.fmt(f),
            ErrorData::Local(kind) => kind.fmt(f),
        }
    }
}

impl std::error::Error for Error {}

impl From<bluelink::Error> for Error {
    fn from(error: bluelink::Error) -> Self {
        Error {
            data: ErrorData::Link(error),
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error {
            data: ErrorData::Local(kind),
        }
    }
}

impl From<bluelink::ErrorKind> for Error {
    fn from(kind: bluelink::ErrorKind) -> Self {
        ErrorKind::Link(kind).into()
    }
}

/// The callback holding the sender was dropped without resolving it.
impl From<oneshot::Canceled> for Error {
    fn from(_value: oneshot::Canceled) -> Self {
        ErrorKind::Canceled.into()
    }
}

impl From<async_broadcast::RecvError> for Error {
    fn from(value: async_broadcast::RecvError) -> Self {
        match value {
            async_broadcast::RecvError::Overflowed(_) => ErrorKind::Lagged.into(),
            async_broadcast::RecvError::Closed => ErrorKind::Canceled.into(),
        }
    }
}

impl Error {
    /// The link error behind this one, if the link reported it.
    pub fn get_ref(&self) -> Option<&bluelink::Error> {
        match &self.data {
            ErrorData::Link(error) => Some(error),
            ErrorData::Local(_) => None,
        }
    }

    pub fn into_inner(self) -> Option<bluelink::Error> {
        match self.data {
            ErrorData::Link(error) => Some(error),
            ErrorData::Local(_) => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match &self.data {
            ErrorData::Link(error) => ErrorKind::Link(error.kind()),
            ErrorData::Local(kind) => *kind,
        }
    }
}

/// Recovers the link's kind. Fails for kinds that only exist in the async layer.
impl TryFrom<ErrorKind> for bluelink::ErrorKind {
    type Error = ErrorKind;

    fn try_from(kind: ErrorKind) -> std::result::Result<Self, Self::Error> {
        match kind {
            ErrorKind::Link(kind) => Ok(kind),
            ErrorKind::Canceled | ErrorKind::Lagged => Err(kind),
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Link(kind) => kind.fmt(f),
            ErrorKind::Canceled => f.write_str("waited-on operation ended without an outcome"),
            ErrorKind::Lagged => f.write_str("receiver missed broadcast values"),
        }
    }
}
