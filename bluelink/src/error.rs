use std::borrow::Cow;
use std::fmt::Display;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    data: ErrorData,
}

/// The kind of error that occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    /// The host has no Bluetooth adapter, or it could not be turned on.
    AdapterUnavailable,
    /// Automatic pairing was rejected. The user may still pair manually.
    PairingFailed,
    /// The link could not be established.
    ConnectFailed,
    /// The radio reported a failed service discovery.
    ServiceDiscoveryFailed,
    /// The configured service is not offered by the peripheral.
    ServiceNotFound,
    /// The write or notify characteristic could not be resolved.
    CharacteristicNotFound,
    /// The peripheral did not accept the requested MTU.
    MtuNegotiationFailed,
    /// Notifications could not be enabled. Writes still work.
    NotifyEnableFailed,
    /// A write on the data channel was rejected.
    WriteFailed,
    /// There is no bound data channel.
    NotConnected,
    /// An accessor was used before [`Link::enable_radio`](crate::Link::enable_radio).
    Usage,
    /// The configuration could not be built.
    InvalidConfiguration,
    /// An ATT status code reported by the peripheral.
    Att(AttError),
    /// An unknown or other error.
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ErrorData {
    Simple(ErrorKind),
    Detailed {
        kind: ErrorKind,
        message: Cow<'static, str>,
    },
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.data {
            ErrorData::Simple(kind) => kind.fmt(f),
            ErrorData::Detailed { kind, message } => write!(f, "{kind}: {message}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error {
            data: ErrorData::Simple(kind),
        }
    }
}

impl From<AttError> for Error {
    fn from(error: AttError) -> Self {
        ErrorKind::Att(error).into()
    }
}

impl Error {
    pub fn with_message(kind: ErrorKind, message: impl Into<Cow<'static, str>>) -> Self {
        Error {
            data: ErrorData::Detailed {
                kind,
                message: message.into(),
            },
        }
    }

    /// Returns the detail message, if one was attached.
    pub fn message(&self) -> Option<&str> {
        match &self.data {
            ErrorData::Simple(_) => None,
            ErrorData::Detailed { message, .. } => Some(&**message),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match &self.data {
            ErrorData::Simple(kind) => *kind,
            ErrorData::Detailed { kind, .. } => *kind,
        }
    }

    /// Re-labels the error while keeping its detail message.
    pub(crate) fn into_kind(self, kind: ErrorKind) -> Self {
        match self.data {
            ErrorData::Simple(inner) => Error::with_message(kind, inner.to_string()),
            ErrorData::Detailed { message, .. } => Error::with_message(kind, message),
        }
    }
}

impl ErrorKind {
    /// Whether retrying cannot help.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorKind::AdapterUnavailable | ErrorKind::Usage)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::AdapterUnavailable => f.write_str("bluetooth adapter unavailable"),
            ErrorKind::PairingFailed => f.write_str("automatic pairing failed"),
            ErrorKind::ConnectFailed => f.write_str("connection failed"),
            ErrorKind::ServiceDiscoveryFailed => f.write_str("service discovery failed"),
            ErrorKind::ServiceNotFound => f.write_str("service not found"),
            ErrorKind::CharacteristicNotFound => f.write_str("characteristic not found"),
            ErrorKind::MtuNegotiationFailed => f.write_str("MTU negotiation failed"),
            ErrorKind::NotifyEnableFailed => f.write_str("enabling notifications failed"),
            ErrorKind::WriteFailed => f.write_str("write failed"),
            ErrorKind::NotConnected => f.write_str("not connected"),
            ErrorKind::Usage => f.write_str("radio not enabled, call enable_radio() first"),
            ErrorKind::InvalidConfiguration => f.write_str("invalid configuration"),
            ErrorKind::Att(att) => att.fmt(f),
            ErrorKind::Other => f.write_str("other error"),
        }
    }
}

/// A raw ATT status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttError(pub u8);

impl AttError {
    pub const INVALID_HANDLE: AttError = AttError(0x01);
    pub const READ_NOT_PERMITTED: AttError = AttError(0x02);
    pub const WRITE_NOT_PERMITTED: AttError = AttError(0x03);
    pub const INVALID_PDU: AttError = AttError(0x04);
    pub const INSUFFICIENT_AUTHENTICATION: AttError = AttError(0x05);
    pub const REQUEST_NOT_SUPPORTED: AttError = AttError(0x06);
    pub const INVALID_OFFSET: AttError = AttError(0x07);
    pub const INSUFFICIENT_AUTHORIZATION: AttError = AttError(0x08);
    pub const PREPARE_QUEUE_FULL: AttError = AttError(0x09);
    pub const ATTRIBUTE_NOT_FOUND: AttError = AttError(0x0a);
    pub const ATTRIBUTE_NOT_LONG: AttError = AttError(0x0b);
    pub const INSUFFICIENT_ENCRYPTION_KEY_SIZE: AttError = AttError(0x0c);
    pub const INVALID_ATTRIBUTE_VALUE_LENGTH: AttError = AttError(0x0d);
    pub const UNLIKELY_ERROR: AttError = AttError(0x0e);
    pub const INSUFFICIENT_ENCRYPTION: AttError = AttError(0x0f);
    pub const UNSUPPORTED_GROUP_TYPE: AttError = AttError(0x10);
    pub const INSUFFICIENT_RESOURCES: AttError = AttError(0x11);
}

impl Display for AttError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            AttError::INVALID_HANDLE => f.write_str("invalid handle"),
            AttError::READ_NOT_PERMITTED => f.write_str("read not permitted"),
            AttError::WRITE_NOT_PERMITTED => f.write_str("write not permitted"),
            AttError::INVALID_PDU => f.write_str("invalid PDU"),
            AttError::INSUFFICIENT_AUTHENTICATION => f.write_str("insufficient authentication"),
            AttError::REQUEST_NOT_SUPPORTED => f.write_str("request not supported"),
            AttError::INVALID_OFFSET => f.write_str("invalid offset"),
            AttError::INSUFFICIENT_AUTHORIZATION => f.write_str("insufficient authorization"),
            AttError::PREPARE_QUEUE_FULL => f.write_str("prepare queue full"),
            AttError::ATTRIBUTE_NOT_FOUND => f.write_str("attribute not found"),
            AttError::ATTRIBUTE_NOT_LONG => f.write_str("attribute not long"),
            AttError::INSUFFICIENT_ENCRYPTION_KEY_SIZE => {
                f.write_str("insufficient encryption key size")
            }
            AttError::INVALID_ATTRIBUTE_VALUE_LENGTH => {
                f.write_str("invalid attribute value length")
            }
            AttError::UNLIKELY_ERROR => f.write_str("unlikely error"),
            AttError::INSUFFICIENT_ENCRYPTION => f.write_str("insufficient encryption"),
            AttError::UNSUPPORTED_GROUP_TYPE => f.write_str("unsupported group type"),
            AttError::INSUFFICIENT_RESOURCES => f.write_str("insufficient resources"),
            _ => write!(f, "unknown ATT error ({:#04x})", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detailed_errors_keep_kind_and_message() {
        let error = Error::with_message(ErrorKind::ServiceNotFound, "0000180d missing");
        assert_eq!(error.kind(), ErrorKind::ServiceNotFound);
        assert_eq!(error.message(), Some("0000180d missing"));
        assert_eq!(error.to_string(), "service not found: 0000180d missing");
    }

    #[test]
    fn att_codes_render_by_name() {
        let error = Error::from(AttError::WRITE_NOT_PERMITTED);
        assert_eq!(error.kind(), ErrorKind::Att(AttError::WRITE_NOT_PERMITTED));
        assert_eq!(error.to_string(), "write not permitted");
        assert_eq!(AttError(0x80).to_string(), "unknown ATT error (0x80)");
    }

    #[test]
    fn relabeling_keeps_the_cause() {
        let error = Error::from(AttError::INSUFFICIENT_ENCRYPTION).into_kind(ErrorKind::WriteFailed);
        assert_eq!(error.kind(), ErrorKind::WriteFailed);
        assert_eq!(error.message(), Some("insufficient encryption"));
    }

    #[test]
    fn only_setup_errors_are_fatal() {
        assert!(ErrorKind::AdapterUnavailable.is_fatal());
        assert!(ErrorKind::Usage.is_fatal());
        assert!(!ErrorKind::PairingFailed.is_fatal());
        assert!(!ErrorKind::MtuNegotiationFailed.is_fatal());
    }
}
