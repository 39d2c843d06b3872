#[cfg(feature = "trace")]
use tracing::instrument;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9669;
pub const DEFAULT_MAX_CONNECTIONS: usize = 10000;
pub const DEFAULT_MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// Listener settings, handed to [`crate::server::Server::new`] at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
    /// Largest `Content-Length` accepted before answering 413.
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

impl ServerConfig {
    #[cfg_attr(feature = "trace", instrument(level = "trace", skip_all))]
    pub fn with_port(port: u16) -> Self {
        ServerConfig {
            port,
            ..ServerConfig::default()
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
