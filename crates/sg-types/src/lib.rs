mod params;
mod row;
mod value;

pub use params::{Direction, Parameter, Parameters};
pub use row::{FromRow, Reader, ResultSet, Row};
pub use value::{FromValue, ToValue, Value};

/// Failures raised while building, encoding or decoding shard keys.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("checksum mismatch: token carries {expected:#05x}, payload sums to {actual:#05x}")]
    ChecksumMismatch { expected: u16, actual: u16 },
    #[error("unsupported key format version in header byte {0:#04x}")]
    UnsupportedVersion(u8),
    #[error("key data ended while reading a {kind} component")]
    Truncated { kind: &'static str },
    /// A string component longer than 127 bytes. A 128-byte string does not
    /// fit either: the length byte keeps the null flag in its low bit, so
    /// seven bits remain for the length.
    #[error("string component is {len} bytes, limit is {max}")]
    StringTooLong { len: usize, max: usize },
    #[error("invalid {kind} component: {reason}")]
    InvalidValue { kind: &'static str, reason: String },
    #[error("{0} unexpected trailing bytes after the last key component")]
    TrailingBytes(usize),
    #[error("malformed key token: {0}")]
    Malformed(String),
    #[error("origin '0' is reserved for the empty key, but the key carries non-default ids")]
    InvalidEmptyKey,
    #[error("key origin mismatch: expected '{expected}', found '{actual}'")]
    OriginMismatch { expected: char, actual: char },
}

/// Driver failure, classified by the driver as transient (retryable) or not.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct DbError {
    pub message: String,
    pub transient: bool,
}

impl DbError {
    pub fn transient(message: impl Into<String>) -> Self {
        DbError { message: message.into(), transient: true }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        DbError { message: message.into(), transient: false }
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SgError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("no credential entry named '{key}'")]
    MissingCredential { key: String },
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("circuit breaker open for operation '{operation}'")]
    CircuitOpen { operation: String },
    #[error("operation cancelled")]
    Cancelled,
    #[error("operation '{operation}' was expected to return an output value but did not")]
    MissingOutput { operation: String },
    #[error("mapping error: {0}")]
    Mapping(String),
    #[error("shard '{0}' is not part of the shard set")]
    UnknownShard(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl SgError {
    /// Only driver-classified transient failures are eligible for retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, SgError::Database(e) if e.is_transient())
    }
}
