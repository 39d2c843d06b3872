use crate::error::EchoError;
use bytes::{Buf, Bytes, BytesMut};
use http::header::{CONNECTION, TRANSFER_ENCODING};
use http::{Method, Request, StatusCode, Uri, Version};
use httparse::Status;
use tokio::io::{AsyncRead, AsyncReadExt};
#[cfg(feature = "trace")]
use tracing::instrument;

pub const BUF_SIZE: usize = 8192;
pub const HEADER_LIMIT: usize = 64;
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

/// The request target and headers as they arrived on the wire.
///
/// `http::HeaderMap` lowercases names and `Uri` normalises some targets,
/// so the untouched text travels in the request extensions.
#[derive(Debug, Clone, Default)]
pub struct RawRequest {
    pub target: String,
    pub headers: Vec<(String, String)>,
}

impl RawRequest {
    /// First value of `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Reads one request line and header block from `socket`.
///
/// Bytes after the header block stay in `buffer` for the body or the next
/// pipelined request.
#[cfg_attr(feature = "trace", instrument(level = "trace", skip_all))]
pub async fn read_request_head<S>(
    socket: &mut S,
    buffer: &mut BytesMut,
) -> Result<Request<()>, EchoError>
where
    S: AsyncRead + Unpin,
{
    loop {
        if !buffer.is_empty() {
            if let Some((request, head_len)) = parse_request_head(&buffer[..])? {
                buffer.advance(head_len);
                return Ok(request);
            }
            if buffer.len() >= MAX_HEAD_SIZE {
                return Err(EchoError::RequestError {
                    details: "request head too large".to_string(),
                    status_code: StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
                });
            }
        }

        buffer.reserve(BUF_SIZE);
        if socket.read_buf(buffer).await? == 0 {
            return Err(EchoError::ConnectionClosed);
        }
    }
}

#[cfg_attr(feature = "trace", instrument(level = "trace", skip_all))]
fn parse_request_head(buf: &[u8]) -> Result<Option<(Request<()>, usize)>, EchoError> {
    let mut headers = [httparse::EMPTY_HEADER; HEADER_LIMIT];
    let mut req = httparse::Request::new(&mut headers);

    let head_len = match req.parse(buf) {
        Ok(Status::Complete(len)) => len,
        Ok(Status::Partial) => return Ok(None),
        Err(httparse::Error::TooManyHeaders) => {
            return Err(EchoError::RequestError {
                details: "too many headers".to_string(),
                status_code: StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
            })
        }
        Err(err) => {
            return Err(EchoError::RequestError {
                details: err.to_string(),
                status_code: StatusCode::BAD_REQUEST,
            })
        }
    };

    let method = req.method.ok_or_else(|| bad_request("method absent"))?;
    let target = req.path.ok_or_else(|| bad_request("path absent"))?;
    let version = match req.version {
        Some(0) => Version::HTTP_10,
        Some(1) => Version::HTTP_11,
        _ => return Err(bad_request("unsupported version")),
    };

    let method = Method::from_bytes(method.as_bytes()).map_err(|_| bad_request("bad method"))?;
    // Targets `Uri` refuses are still echoed from `RawRequest::target`.
    let uri = target.parse::<Uri>().unwrap_or_default();

    let mut builder = Request::builder().method(method).uri(uri).version(version);
    let mut raw_headers = Vec::with_capacity(req.headers.len());
    for header in req.headers.iter() {
        builder = builder.header(header.name, header.value);
        raw_headers.push((
            header.name.to_string(),
            String::from_utf8_lossy(header.value).into_owned(),
        ));
    }

    let request = builder
        .extension(RawRequest {
            target: target.to_string(),
            headers: raw_headers,
        })
        .body(())
        .map_err(|err| bad_request(&err.to_string()))?;

    Ok(Some((request, head_len)))
}

fn bad_request(details: &str) -> EchoError {
    EchoError::RequestError {
        details: details.to_string(),
        status_code: StatusCode::BAD_REQUEST,
    }
}

/// Raw `Content-Length` value, verbatim.
pub fn raw_content_length<B>(request: &Request<B>) -> Option<&str> {
    request
        .extensions()
        .get::<RawRequest>()
        .and_then(|raw| raw.header("Content-Length"))
}

/// Declared body length; an absent or empty header means an empty body.
#[cfg_attr(feature = "trace", instrument(level = "trace", skip_all))]
pub fn content_length<B>(request: &Request<B>) -> Result<usize, EchoError> {
    match raw_content_length(request).map(str::trim) {
        None | Some("") => Ok(0),
        Some(value) => Ok(value.parse::<usize>()?),
    }
}

/// Reads exactly `length` body bytes, draining `buffer` first.
#[cfg_attr(feature = "trace", instrument(level = "trace", skip_all))]
pub async fn read_body<S>(
    socket: &mut S,
    buffer: &mut BytesMut,
    length: usize,
) -> Result<Bytes, EchoError>
where
    S: AsyncRead + Unpin,
{
    if buffer.len() < length {
        buffer.reserve(length - buffer.len());
    }
    while buffer.len() < length {
        if socket.read_buf(buffer).await? == 0 {
            return Err(EchoError::ConnectionClosed);
        }
    }
    Ok(buffer.split_to(length).freeze())
}

/// Whether the connection may carry another request after this one.
pub fn keep_alive<B>(request: &Request<B>) -> bool {
    // only Content-Length framing is read; a chunked body would be left on the wire
    if request.headers().contains_key(TRANSFER_ENCODING) {
        return false;
    }
    let connection = request
        .headers()
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .collect::<Vec<String>>();

    if connection.iter().any(|token| token == "close") {
        return false;
    }
    match request.version() {
        Version::HTTP_10 => connection.iter().any(|token| token == "keep-alive"),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use crate::error::EchoError;
    use crate::request::{
        content_length, keep_alive, raw_content_length, read_body, read_request_head,
        RawRequest, BUF_SIZE,
    };
    use bytes::BytesMut;
    use http::{Method, StatusCode, Version};
    use std::error::Error;

    #[tokio::test]
    async fn test_simple() -> Result<(), Box<dyn Error>> {
        let mut socket: &[u8] = b"GET /search?q=rust HTTP/1.1\r\nHost: example.com\r\nUser-Agent: curl/8.5.0\r\nAccept: */*\r\n\r\n";
        let mut buffer = BytesMut::with_capacity(BUF_SIZE);

        let req = read_request_head(&mut socket, &mut buffer).await?;
        assert_eq!(req.method(), Method::GET);
        assert_eq!(req.version(), Version::HTTP_11);
        assert_eq!(req.uri().path(), "/search");

        let raw = req.extensions().get::<RawRequest>().ok_or("raw request absent")?;
        assert_eq!(raw.target, "/search?q=rust");
        assert_eq!(raw.headers.len(), 3);
        assert_eq!(raw.header("user-agent"), Some("curl/8.5.0"));
        assert_eq!(content_length(&req)?, 0);
        assert!(buffer.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_header_case_preserved() -> Result<(), Box<dyn Error>> {
        let mut socket: &[u8] = b"POST / HTTP/1.1\r\nX-Custom: hello\r\ncontent-length: 2\r\n\r\n{}";
        let mut buffer = BytesMut::new();

        let req = read_request_head(&mut socket, &mut buffer).await?;
        let raw = req.extensions().get::<RawRequest>().ok_or("raw request absent")?;
        assert_eq!(raw.headers[0], ("X-Custom".to_string(), "hello".to_string()));
        assert_eq!(raw_content_length(&req), Some("2"));
        Ok(())
    }

    #[tokio::test]
    async fn test_body_and_pipelined_request() -> Result<(), Box<dyn Error>> {
        let mut socket: &[u8] =
            b"PUT /users/42 HTTP/1.1\r\nContent-Length: 16\r\n\r\n{\"name\" : \"Ann\"}GET / HTTP/1.1\r\n\r\n";
        let mut buffer = BytesMut::new();

        let req = read_request_head(&mut socket, &mut buffer).await?;
        let length = content_length(&req)?;
        assert_eq!(length, 16);
        let body = read_body(&mut socket, &mut buffer, length).await?;
        assert_eq!(&body[..], b"{\"name\" : \"Ann\"}");

        let next = read_request_head(&mut socket, &mut buffer).await?;
        assert_eq!(next.method(), Method::GET);
        Ok(())
    }

    #[tokio::test]
    async fn test_truncated_body() -> Result<(), Box<dyn Error>> {
        let mut socket: &[u8] = b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\n{}";
        let mut buffer = BytesMut::new();

        let req = read_request_head(&mut socket, &mut buffer).await?;
        let result = read_body(&mut socket, &mut buffer, content_length(&req)?).await;
        assert!(matches!(result, Err(EchoError::ConnectionClosed)));
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_content_length() -> Result<(), Box<dyn Error>> {
        let mut socket: &[u8] = b"POST / HTTP/1.1\r\nContent-Length: ten\r\n\r\n";
        let mut buffer = BytesMut::new();

        let req = read_request_head(&mut socket, &mut buffer).await?;
        let err = content_length(&req).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_content_length() -> Result<(), Box<dyn Error>> {
        let mut socket: &[u8] = b"POST / HTTP/1.1\r\nContent-Length: \r\n\r\n";
        let mut buffer = BytesMut::new();

        let req = read_request_head(&mut socket, &mut buffer).await?;
        assert_eq!(raw_content_length(&req), Some(""));
        assert_eq!(content_length(&req)?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_request_line() {
        let mut socket: &[u8] = b"GET\r\n\r\n";
        let mut buffer = BytesMut::new();

        let err = read_request_head(&mut socket, &mut buffer).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_empty_connection() {
        let mut socket: &[u8] = b"";
        let mut buffer = BytesMut::new();

        let result = read_request_head(&mut socket, &mut buffer).await;
        assert!(matches!(result, Err(EchoError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_keep_alive() -> Result<(), Box<dyn Error>> {
        let cases: [(&[u8], bool); 5] = [
            (&b"GET / HTTP/1.1\r\n\r\n"[..], true),
            (&b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n"[..], false),
            (&b"GET / HTTP/1.0\r\n\r\n"[..], false),
            (&b"GET / HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\n"[..], true),
            (&b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n"[..], false),
        ];
        for (input, expected) in cases {
            let mut socket = input;
            let mut buffer = BytesMut::new();
            let req = read_request_head(&mut socket, &mut buffer).await?;
            assert_eq!(keep_alive(&req), expected);
        }
        Ok(())
    }
}
