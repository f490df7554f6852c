//! Error domain for the s4 client
//!
//! One error type carries a numeric code plus a human-readable detail
//! message. Codes below 100 are API-misuse / transport errors raised by this
//! library; codes at 100 and above are passthrough mappings of S3 service
//! error codes, preserving the service's message as detail.

use thiserror::Error;

/// Numeric error codes for the s4 error domain.
///
/// The discriminants are stable and part of the public contract: callers may
/// persist or switch on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    // API errors
    BadParameter = 1,
    NetworkNotAvailable,
    BadServerResponse,
    UnknownError,
    // Service errors
    AccessDenied = 100,
    AccountProblem,
    InternalError,
    InvalidAccessKeyId,
    InvalidArgument,
    InvalidBucketName,
    InvalidBucketState,
    InvalidDigest,
    InvalidObjectState,
    InvalidPayer,
    InvalidRange,
    InvalidSecurity,
    MaxMessageLengthExceeded,
    MaxPostPreDataLengthExceededError,
    MissingContentLength,
    NoSuchBucket,
    NoSuchKey,
    NotSignedUp,
    OperationAborted,
    PermanentRedirect,
    PreconditionFailed,
    RequestTimeout,
    RequestTimeTooSkewed,
    ServiceUnavailable,
    SlowDown,
    TooManyBuckets,
}

impl ErrorCode {
    /// Map an S3 XML `<Code>` string to the local code.
    ///
    /// Unrecognized codes map to `UnknownError` rather than failing the
    /// mapping step itself.
    pub fn from_s3_code(code: &str) -> Self {
        match code {
            "AccessDenied" => Self::AccessDenied,
            "AccountProblem" => Self::AccountProblem,
            "InternalError" => Self::InternalError,
            "InvalidAccessKeyId" => Self::InvalidAccessKeyId,
            "InvalidArgument" => Self::InvalidArgument,
            "InvalidBucketName" => Self::InvalidBucketName,
            "InvalidBucketState" => Self::InvalidBucketState,
            "InvalidDigest" => Self::InvalidDigest,
            "InvalidObjectState" => Self::InvalidObjectState,
            "InvalidPayer" => Self::InvalidPayer,
            "InvalidRange" => Self::InvalidRange,
            "InvalidSecurity" => Self::InvalidSecurity,
            "MaxMessageLengthExceeded" => Self::MaxMessageLengthExceeded,
            "MaxPostPreDataLengthExceededError" => Self::MaxPostPreDataLengthExceededError,
            "MissingContentLength" => Self::MissingContentLength,
            "NoSuchBucket" => Self::NoSuchBucket,
            "NoSuchKey" => Self::NoSuchKey,
            "NotSignedUp" => Self::NotSignedUp,
            "OperationAborted" => Self::OperationAborted,
            "PermanentRedirect" => Self::PermanentRedirect,
            "PreconditionFailed" => Self::PreconditionFailed,
            "RequestTimeout" => Self::RequestTimeout,
            "RequestTimeTooSkewed" => Self::RequestTimeTooSkewed,
            "ServiceUnavailable" => Self::ServiceUnavailable,
            "SlowDown" => Self::SlowDown,
            "TooManyBuckets" => Self::TooManyBuckets,
            _ => Self::UnknownError,
        }
    }

    /// Fallback mapping when an error response carries no parseable S3 code.
    ///
    /// `bucket_scope` selects NoSuchBucket over NoSuchKey for 404s on
    /// bucket-level operations (listing).
    pub fn from_status(status: u16, bucket_scope: bool) -> Self {
        match status {
            401 | 403 => Self::AccessDenied,
            404 if bucket_scope => Self::NoSuchBucket,
            404 => Self::NoSuchKey,
            408 => Self::RequestTimeout,
            416 => Self::InvalidRange,
            500 => Self::InternalError,
            503 => Self::ServiceUnavailable,
            _ => Self::UnknownError,
        }
    }

    /// The stable numeric value of this code.
    pub fn value(self) -> i32 {
        self as i32
    }

    /// True for codes in the service-error range (>= 100).
    pub fn is_service_error(self) -> bool {
        self.value() >= 100
    }
}

/// Error type for all s4 operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code:?} (code {}): {message}", .code.value())]
pub struct S4Error {
    pub code: ErrorCode,
    pub message: String,
}

impl S4Error {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn bad_parameter(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadParameter, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NetworkNotAvailable, message)
    }

    pub fn bad_response(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadServerResponse, message)
    }
}

pub type Result<T> = std::result::Result<T, S4Error>;
