use crate::config::ServerConfig;
use crate::echo::{favicon_response, handle, is_favicon_probe, TraceSink};
use crate::error::EchoError;
use crate::request::{content_length, keep_alive, read_body, read_request_head, BUF_SIZE};
use crate::response::{error_response, log_request_response, send_response};
use bytes::{Bytes, BytesMut};
use http::{Method, Request, StatusCode};
use log::{debug, error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
#[cfg(feature = "trace")]
use tracing::instrument;

pub struct Server {
    config: ServerConfig,
    sink: Arc<dyn TraceSink>,
}

/// A server whose socket is already bound; `run` starts accepting.
pub struct BoundServer {
    listener: TcpListener,
    config: ServerConfig,
    sink: Arc<dyn TraceSink>,
}

impl Server {
    pub fn new(config: ServerConfig, sink: Arc<dyn TraceSink>) -> Self {
        Server { config, sink }
    }

    #[cfg_attr(feature = "trace", instrument(level = "trace", skip_all))]
    pub async fn bind(self) -> Result<BoundServer, EchoError> {
        let listener = TcpListener::bind(self.config.addr()).await?;
        info!("Listening on port: {}", listener.local_addr()?.port());
        Ok(BoundServer {
            listener,
            config: self.config,
            sink: self.sink,
        })
    }
}

impl BoundServer {
    pub fn local_addr(&self) -> Result<SocketAddr, EchoError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves until the process is terminated.
    #[cfg_attr(feature = "trace", instrument(level = "trace", skip_all))]
    pub async fn run(self) -> Result<(), EchoError> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_connections));
        let max_body_size = self.config.max_body_size;

        loop {
            let (mut stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    error!("Accept error: {}", err);
                    continue;
                }
            };
            let permit = semaphore.clone().acquire_owned().await?;
            let sink = self.sink.clone();

            tokio::spawn(async move {
                let _permit = permit;
                if let Err(err) = connection_process(&mut stream, sink.as_ref(), max_body_size).await
                {
                    error!("Connection {}: {}", addr, err);
                }
            });
        }
    }
}

/// Serves requests from one connection until either side closes it.
#[cfg_attr(feature = "trace", instrument(level = "trace", skip_all))]
pub async fn connection_process<S>(
    socket: &mut S,
    sink: &dyn TraceSink,
    max_body_size: usize,
) -> Result<(), EchoError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buffer = BytesMut::with_capacity(BUF_SIZE);

    loop {
        let head = match read_request_head(socket, &mut buffer).await {
            Ok(head) => head,
            Err(EchoError::ConnectionClosed) => return Ok(()),
            Err(err) => return reject::<S, ()>(socket, None, err).await,
        };
        let head_only = head.method() == Method::HEAD;
        let mut close = !keep_alive(&head);

        if is_favicon_probe(&head) {
            // the body stays unread, so the connection cannot be reused
            if !matches!(content_length(&head), Ok(0)) {
                close = true;
            }
            send_response(socket, favicon_response()?, head_only, close).await?;
            log_request_response(&head, StatusCode::OK);
            if close {
                return Ok(());
            }
            continue;
        }

        let body = match request_body(socket, &mut buffer, &head, max_body_size).await {
            Ok(body) => body,
            Err(EchoError::ConnectionClosed) => return Ok(()),
            Err(err) => return reject(socket, Some(&head), err).await,
        };
        let request = head.map(|_| body);

        match handle(&request, sink) {
            Ok(response) => {
                let status = response.status();
                send_response(socket, response, head_only, close).await?;
                log_request_response(&request, status);
            }
            Err(err) => return reject(socket, Some(&request), err).await,
        }

        if close {
            #[cfg(debug_assertions)]
            debug!("Closing connection after response");
            return Ok(());
        }
    }
}

async fn request_body<S>(
    socket: &mut S,
    buffer: &mut BytesMut,
    head: &Request<()>,
    max_body_size: usize,
) -> Result<Bytes, EchoError>
where
    S: AsyncRead + Unpin,
{
    let length = content_length(head)?;
    if length > max_body_size {
        return Err(EchoError::PayloadTooLarge { length });
    }
    read_body(socket, buffer, length).await
}

/// Answers a failed request with a status-only response, closes the
/// connection, and hands the error back to the caller.
async fn reject<S, B>(
    socket: &mut S,
    request: Option<&Request<B>>,
    err: EchoError,
) -> Result<(), EchoError>
where
    S: AsyncWrite + Unpin,
{
    if let EchoError::IOError { .. } = err {
        return Err(err);
    }
    let status = err.status_code();
    send_response(socket, error_response(status)?, false, true).await?;
    if let Some(request) = request {
        log_request_response(request, status);
    }
    Err(err)
}
