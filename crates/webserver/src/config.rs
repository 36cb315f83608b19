use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use thiserror::Error;

#[derive(Parser, Debug)]
#[command(name = "webserver", about = "A small non-blocking HTTP/1.0 file server")]
struct Cli {
    /// Document root. Must already exist; it is canonicalized once at startup.
    #[arg(long, env = "WEBSERVER_ROOT")]
    root: PathBuf,

    /// Address to bind the listener on.
    #[arg(long, env = "WEBSERVER_BIND", default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Minimum tracing level to emit.
    #[arg(long = "log-level", env = "WEBSERVER_LOG", default_value = "info")]
    log_level: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("--root {0:?} does not resolve to an existing directory: {1}")]
    InvalidRoot(PathBuf, std::io::Error),
    #[error("--root {0:?} resolves but is not a directory")]
    RootNotADirectory(PathBuf),
    #[error("--log-level {0:?} is not a recognized level (expected one of trace/debug/info/warn/error)")]
    InvalidLogLevel(String),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub document_root: PathBuf,
    pub bind_addr: SocketAddr,
    pub log_level: tracing::Level,
}

impl ServerConfig {
    /// Parses CLI flags (with environment variable fallbacks and
    /// compile-time defaults), canonicalizing and validating the
    /// document root eagerly. Any failure here is startup-fatal and
    /// happens before any socket is opened (§4.I).
    pub fn from_args() -> Result<Self, ConfigError> {
        let cli = Cli::parse();

        let document_root =
            cli.root.canonicalize().map_err(|err| ConfigError::InvalidRoot(cli.root.clone(), err))?;
        if !document_root.is_dir() {
            return Err(ConfigError::RootNotADirectory(document_root));
        }

        let log_level: tracing::Level =
            cli.log_level.parse().map_err(|_| ConfigError::InvalidLogLevel(cli.log_level.clone()))?;

        Ok(Self { document_root, bind_addr: cli.bind, log_level })
    }
}
