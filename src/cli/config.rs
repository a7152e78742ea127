//! CLI configuration module
//!
//! Runtime settings derived from the command line.

use anyhow::Result;
use std::time::Duration;

use crate::cli::args::CliArgs;
use crate::error::TorrentError;
use crate::peer::ConnectionConfig;
use crate::protocol::Handshake;

/// Configuration shared by all commands
#[derive(Debug, Clone)]
pub struct Config {
    /// Port announced to trackers
    pub port: u16,
    /// Our 20-byte peer id, generated once per run
    pub peer_id: [u8; 20],
    /// Peer session timeouts
    pub connection: ConnectionConfig,
    /// Verbose output
    pub verbose: bool,
    /// Quiet mode
    pub quiet: bool,
}

impl Config {
    /// Create configuration from CLI arguments
    pub fn from_args(args: &CliArgs) -> Self {
        Self {
            port: args.port,
            peer_id: Handshake::generate_peer_id(),
            connection: ConnectionConfig {
                connect_timeout: Duration::from_secs(args.connect_timeout),
                read_timeout: Duration::from_secs(args.read_timeout),
            },
            verbose: args.verbose,
            quiet: args.quiet,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(TorrentError::config_error_with_field("Port cannot be 0", "port").into());
        }
        if self.connection.connect_timeout.is_zero() {
            return Err(
                TorrentError::config_error_with_field("connect timeout must be at least 1s", "connect_timeout").into(),
            );
        }
        if self.connection.read_timeout.is_zero() {
            return Err(TorrentError::config_error_with_field("read timeout must be at least 1s", "read_timeout").into());
        }
        if self.verbose && self.quiet {
            return Err(TorrentError::config_error_with_field("--verbose and --quiet are exclusive", "quiet").into());
        }
        Ok(())
    }

    /// Peer id as hex, for display
    pub fn peer_id_hex(&self) -> String {
        hex::encode(self.peer_id)
    }
}
