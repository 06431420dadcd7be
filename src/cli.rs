//! Command-line options for the client and server binaries

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

use crate::client::ClientConfig;
use crate::logger::{JsonlLogger, Logger, NoopLogger, TextLogger};
use crate::protocol::{MAX_FILE_CHUNK_SIZE, MAX_FILE_NAME_SIZE};
use crate::server::ServerConfig;

/// Send one file to a sendfile server
#[derive(Clone, Debug, Parser)]
#[command(author, version)]
pub struct ClientOpts {
    /// Server IPv4 address or host name
    pub server: String,

    /// Server port (0-65535)
    pub port: u16,

    /// File to send
    pub file: PathBuf,

    /// Server's name capacity; must match the server's --max-name-len
    #[arg(long, default_value_t = MAX_FILE_NAME_SIZE)]
    pub max_name_len: usize,

    /// Show a progress bar on stderr
    #[arg(short, long)]
    pub progress: bool,
}

impl ClientOpts {
    pub fn to_config(&self) -> ClientConfig {
        ClientConfig {
            host: self.server.clone(),
            port: self.port,
            path: self.file.clone(),
            max_name_len: self.max_name_len,
            progress: self.progress,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Jsonl,
}

/// Receive files over TCP, one connection at a time
#[derive(Clone, Debug, Parser)]
#[command(author, version)]
pub struct ServerOpts {
    /// Port to listen on (0-65535)
    pub port: u16,

    /// Local IPv4 address to bind
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: Ipv4Addr,

    /// Directory received files are written into
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Largest payload read per chunk, in bytes
    #[arg(long, default_value_t = MAX_FILE_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Name buffer capacity; names of this length or longer are rejected
    #[arg(long, default_value_t = MAX_FILE_NAME_SIZE)]
    pub max_name_len: usize,

    /// Handle each connection on its own thread
    #[arg(long)]
    pub concurrent: bool,

    /// Append transfer records to this file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Format of --log-file records
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl ServerOpts {
    pub fn to_config(&self) -> ServerConfig {
        ServerConfig {
            bind: self.bind,
            port: self.port,
            root: self.root.clone(),
            chunk_size: self.chunk_size.max(1),
            max_name_len: self.max_name_len,
            concurrent: self.concurrent,
        }
    }

    /// Choose logger once; NoopLogger when no log file is requested
    pub fn logger(&self) -> Result<Arc<dyn Logger>> {
        let Some(path) = &self.log_file else {
            return Ok(Arc::new(NoopLogger));
        };
        let logger: Arc<dyn Logger> = match self.log_format {
            LogFormat::Text => Arc::new(TextLogger::new(path).context("text log")?),
            LogFormat::Jsonl => Arc::new(JsonlLogger::new(path).context("jsonl log")?),
        };
        Ok(logger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_args() {
        let opts = ClientOpts::try_parse_from(["client", "127.0.0.1", "9000", "a.txt"]).unwrap();
        let cfg = opts.to_config();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.path, PathBuf::from("a.txt"));
        assert_eq!(cfg.max_name_len, MAX_FILE_NAME_SIZE);
        assert!(!cfg.progress);

        let opts = ClientOpts::try_parse_from([
            "client",
            "127.0.0.1",
            "9000",
            "a.txt",
            "--max-name-len",
            "256",
        ])
        .unwrap();
        assert_eq!(opts.to_config().max_name_len, 256);
    }

    #[test]
    fn test_port_out_of_range_is_usage_error() {
        assert!(ClientOpts::try_parse_from(["client", "127.0.0.1", "65536", "a.txt"]).is_err());
        assert!(ClientOpts::try_parse_from(["client", "127.0.0.1", "-1", "a.txt"]).is_err());
        assert!(ServerOpts::try_parse_from(["server", "70000"]).is_err());
        assert!(ServerOpts::try_parse_from(["server"]).is_err());
        assert!(ServerOpts::try_parse_from(["server", "0"]).is_ok());
        assert!(ServerOpts::try_parse_from(["server", "65535"]).is_ok());
    }

    #[test]
    fn test_server_defaults() {
        let opts = ServerOpts::try_parse_from(["server", "1234"]).unwrap();
        let cfg = opts.to_config();
        assert_eq!(cfg.port, 1234);
        assert_eq!(cfg.bind, Ipv4Addr::UNSPECIFIED);
        assert_eq!(cfg.chunk_size, MAX_FILE_CHUNK_SIZE);
        assert_eq!(cfg.max_name_len, MAX_FILE_NAME_SIZE);
        assert!(!cfg.concurrent);
        assert!(opts.log_file.is_none());
    }

    #[test]
    fn test_server_log_options() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("t.jsonl");
        let opts = ServerOpts::try_parse_from([
            "server",
            "1234",
            "--log-file",
            log.to_str().unwrap(),
            "--log-format",
            "jsonl",
            "--concurrent",
        ])
        .unwrap();
        assert_eq!(opts.log_format, LogFormat::Jsonl);
        assert!(opts.to_config().concurrent);
        opts.logger().unwrap();
        assert!(log.exists());
    }
}
