//! The echo handler: turns one request into a JSON description of itself.

use crate::error::EchoError;
use crate::request::{raw_content_length, RawRequest};
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{Method, Request, Response, StatusCode};
use log::{debug, error};
use serde::Serialize;
use serde_json::{Map, Value};
use std::io::Write;
#[cfg(feature = "trace")]
use tracing::instrument;

pub const FAVICON_PATH: &str = "/favicon.ico";

/// How a request method is treated. Only `Get` has behaviour of its own
/// (the favicon short-circuit); the other two share one code path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectiveMethod {
    Get,
    Options,
    Mutating,
}

impl EffectiveMethod {
    pub fn of(method: &Method) -> Self {
        if method == Method::GET || method == Method::HEAD {
            EffectiveMethod::Get
        } else if method == Method::OPTIONS {
            EffectiveMethod::Options
        } else {
            EffectiveMethod::Mutating
        }
    }
}

/// Everything the server saw of one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EchoRecord {
    pub path: String,
    pub method: String,
    #[serde(rename = "content-length")]
    pub content_length: Option<String>,
    pub headers: Map<String, Value>,
    pub data: Value,
}

#[derive(Debug, Serialize)]
struct EchoResponse<'a> {
    error: bool,
    message: String,
    received: &'a EchoRecord,
}

impl EchoRecord {
    #[cfg_attr(feature = "trace", instrument(level = "trace", skip_all))]
    pub fn capture(request: &Request<Bytes>) -> Result<Self, EchoError> {
        let mut headers = Map::new();
        let path = match request.extensions().get::<RawRequest>() {
            Some(raw) => {
                // a repeated name keeps its first value
                for (name, value) in &raw.headers {
                    headers
                        .entry(name.clone())
                        .or_insert_with(|| Value::String(value.clone()));
                }
                raw.target.clone()
            }
            // built in-process rather than read off a socket
            None => {
                for (name, value) in request.headers() {
                    headers.entry(name.as_str().to_string()).or_insert_with(|| {
                        Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned())
                    });
                }
                request.uri().to_string()
            }
        };

        let content_length = raw_content_length(request)
            .map(str::to_string)
            .or_else(|| {
                request
                    .headers()
                    .get(http::header::CONTENT_LENGTH)
                    .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
            });

        Ok(EchoRecord {
            path,
            method: request.method().as_str().to_ascii_uppercase(),
            content_length,
            headers,
            data: parse_body(request.body())?,
        })
    }
}

/// An empty body reads as `{}`; anything else must be valid UTF-8 JSON.
pub fn parse_body(body: &[u8]) -> Result<Value, EchoError> {
    if body.is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    Ok(serde_json::from_slice(body)?)
}

/// Destination of the per-request diagnostic dump.
pub trait TraceSink: Send + Sync {
    fn trace(&self, record: &EchoRecord);
}

/// Writes `record` as 2-space indented JSON followed by a newline.
pub fn write_trace<W: Write>(out: &mut W, record: &EchoRecord) -> std::io::Result<()> {
    serde_json::to_writer_pretty(&mut *out, record)?;
    out.write_all(b"\n")?;
    out.flush()
}

/// Pretty-prints each record to standard output.
pub struct StdoutTrace;

impl TraceSink for StdoutTrace {
    fn trace(&self, record: &EchoRecord) {
        let mut stdout = std::io::stdout().lock();
        if let Err(err) = write_trace(&mut stdout, record) {
            error!("Trace write failed: {}", err);
        }
    }
}

/// GET or HEAD of exactly `/favicon.ico`.
pub fn is_favicon_probe<B>(request: &Request<B>) -> bool {
    if EffectiveMethod::of(request.method()) != EffectiveMethod::Get {
        return false;
    }
    match request.extensions().get::<RawRequest>() {
        Some(raw) => raw.target == FAVICON_PATH,
        None => request.uri() == FAVICON_PATH,
    }
}

pub fn favicon_response() -> Result<Response<Bytes>, EchoError> {
    Ok(Response::builder().status(StatusCode::OK).body(Bytes::new())?)
}

/// Answers one request. Favicon probes get an empty 200 and leave no trace;
/// every other request is traced to `sink` and echoed back as JSON.
#[cfg_attr(feature = "trace", instrument(level = "trace", skip_all))]
pub fn handle(request: &Request<Bytes>, sink: &dyn TraceSink) -> Result<Response<Bytes>, EchoError> {
    if is_favicon_probe(request) {
        return favicon_response();
    }

    #[cfg(debug_assertions)]
    debug!(
        "{} handled as {:?}",
        request.method(),
        EffectiveMethod::of(request.method())
    );

    let record = EchoRecord::capture(request)?;
    sink.trace(&record);
    echo_response(&record)
}

fn echo_response(record: &EchoRecord) -> Result<Response<Bytes>, EchoError> {
    let body = serde_json::to_vec(&EchoResponse {
        error: false,
        message: format!("Handled {} request", record.method),
        received: record,
    })
    .map_err(|err| EchoError::ResponseError {
        details: err.to_string(),
    })?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/json")
        .body(Bytes::from(body))?)
}
