use crate::error::EchoError;
use crate::request::RawRequest;
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use log::info;
use tokio::io::{AsyncWrite, AsyncWriteExt};
#[cfg(feature = "trace")]
use tracing::instrument;

/// Writes `response` as HTTP/1.1. `Content-Length` always reflects the body,
/// even when `head_only` leaves the body bytes off the wire.
#[cfg_attr(feature = "trace", instrument(level = "trace", skip_all))]
pub async fn send_response<S>(
    socket: &mut S,
    response: Response<Bytes>,
    head_only: bool,
    close: bool,
) -> Result<(), EchoError>
where
    S: AsyncWrite + Unpin,
{
    let (parts, body) = response.into_parts();

    // Estimate capacity to reduce reallocations
    let mut resp_bytes = Vec::with_capacity(128 + body.len());
    let mut itoa_buf = itoa::Buffer::new();

    resp_bytes.extend_from_slice(b"HTTP/1.1 ");
    resp_bytes.extend_from_slice(itoa_buf.format(parts.status.as_u16()).as_bytes());
    resp_bytes.extend_from_slice(b" ");
    resp_bytes.extend_from_slice(parts.status.canonical_reason().unwrap_or("").as_bytes());
    resp_bytes.extend_from_slice(b"\r\n");

    for (key, value) in parts.headers.iter() {
        resp_bytes.extend_from_slice(key.as_str().as_bytes());
        resp_bytes.extend_from_slice(b": ");
        resp_bytes.extend_from_slice(value.as_bytes());
        resp_bytes.extend_from_slice(b"\r\n");
    }

    resp_bytes.extend_from_slice(b"content-length: ");
    resp_bytes.extend_from_slice(itoa_buf.format(body.len()).as_bytes());
    resp_bytes.extend_from_slice(b"\r\n");
    if close {
        resp_bytes.extend_from_slice(b"connection: close\r\n");
    }

    resp_bytes.extend_from_slice(b"\r\n");
    if !head_only {
        resp_bytes.extend_from_slice(&body);
    }

    socket.write_all(&resp_bytes).await?;
    socket.flush().await?;

    Ok(())
}

#[cfg_attr(feature = "trace", instrument(level = "trace", skip_all))]
pub fn error_response(status: StatusCode) -> Result<Response<Bytes>, EchoError> {
    let msg = match status {
        StatusCode::BAD_REQUEST => "Bad request",
        StatusCode::PAYLOAD_TOO_LARGE => "Payload too large",
        StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE => "Request header fields too large",
        StatusCode::INTERNAL_SERVER_ERROR => "Internal server error",
        _ => "Unknown error",
    };

    Ok(Response::builder()
        .status(status)
        .body(Bytes::from_static(msg.as_bytes()))?)
}

pub fn log_request_response<B>(request: &Request<B>, status: StatusCode) {
    match request.extensions().get::<RawRequest>() {
        Some(raw) => info!(
            "Request: {} {} {}",
            request.method(),
            raw.target,
            status.as_u16()
        ),
        None => info!(
            "Request: {} {} {}",
            request.method(),
            request.uri(),
            status.as_u16()
        ),
    }
}
