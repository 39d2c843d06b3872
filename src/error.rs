use http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EchoError {
    #[error("ParseRequestError: {details:?}")]
    RequestError {
        details: String,
        status_code: StatusCode,
    },
    #[error("ConnectionClosed")]
    ConnectionClosed,
    #[error("PayloadTooLarge: {length} bytes")]
    PayloadTooLarge { length: usize },
    // request body is not JSON (or not UTF-8)
    #[error("BodyParseError: {source}")]
    BodyParseError {
        #[from]
        source: serde_json::Error,
    },
    #[error("IOError: {source:?}")]
    IOError {
        #[from]
        source: std::io::Error,
    },
    // from AcquireError
    #[error("AcquireError: {source:?}")]
    AcquireError {
        #[from]
        source: tokio::sync::AcquireError,
    },
    // from http::Error
    #[error("HttpError: {source:?}")]
    HttpError {
        #[from]
        source: http::Error,
    },
    // from std::num::ParseIntError, only raised for Content-Length
    #[error("InvalidContentLength: {source:?}")]
    InvalidContentLength {
        #[from]
        source: std::num::ParseIntError,
    },
    #[error("ResponseError: {details:?}")]
    ResponseError { details: String },
}

impl EchoError {
    /// Status the listener answers with when handling fails.
    pub fn status_code(&self) -> StatusCode {
        match self {
            EchoError::RequestError { status_code, .. } => *status_code,
            EchoError::InvalidContentLength { .. } => StatusCode::BAD_REQUEST,
            EchoError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
