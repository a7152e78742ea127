//! CLI arguments module
//!
//! Defines command-line argument parsing using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI arguments for the torrent client
#[derive(Debug, Parser)]
#[command(name = "mini-torrent")]
#[command(about = "A minimal BitTorrent client", long_about = None)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Port announced to trackers
    #[arg(short, long, global = true, default_value_t = 6881)]
    pub port: u16,

    /// TCP connect timeout in seconds
    #[arg(long, global = true, default_value_t = 10)]
    pub connect_timeout: u64,

    /// Per-read timeout in seconds for peer sessions
    #[arg(long, global = true, default_value_t = 30)]
    pub read_timeout: u64,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet mode (no logging except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
#[command(rename_all = "snake_case")]
pub enum Command {
    /// Decode a bencoded value and print it as JSON
    Decode {
        value: String,
    },
    /// Print the metadata of a torrent file
    Info {
        torrent: PathBuf,
    },
    /// Ask the tracker for peers
    Peers {
        torrent: PathBuf,
    },
    /// Handshake with one peer and print its peer id
    Handshake {
        torrent: PathBuf,
        /// Peer address as ip:port
        peer: String,
    },
    /// Download and verify a single piece
    DownloadPiece {
        #[arg(short, long)]
        output: PathBuf,
        torrent: PathBuf,
        index: u32,
    },
    /// Download the whole file
    Download {
        #[arg(short, long)]
        output: PathBuf,
        torrent: PathBuf,
    },
    /// Print the tracker and info hash of a magnet link
    MagnetParse {
        uri: String,
    },
    /// Extension handshake with the first peer of a magnet link
    MagnetHandshake {
        uri: String,
    },
    /// Fetch and print the metadata of a magnet link
    MagnetInfo {
        uri: String,
    },
    /// Download and verify a single piece of a magnet link
    MagnetDownloadPiece {
        #[arg(short, long)]
        output: PathBuf,
        uri: String,
        index: u32,
    },
    /// Download the whole file of a magnet link
    MagnetDownload {
        #[arg(short, long)]
        output: PathBuf,
        uri: String,
    },
}

impl CliArgs {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    /// Get the log level based on verbosity settings
    pub fn log_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else if self.quiet {
            tracing::Level::ERROR
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let args = CliArgs::try_parse_from(["mini-torrent", "info", "sample.torrent"]).unwrap();
        assert_eq!(args.port, 6881);
        assert_eq!(args.connect_timeout, 10);
        assert_eq!(args.read_timeout, 30);
        assert!(!args.verbose);
        assert_eq!(
            args.command,
            Command::Info {
                torrent: PathBuf::from("sample.torrent")
            }
        );
        assert_eq!(args.log_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_snake_case_subcommands() {
        let args = CliArgs::try_parse_from([
            "mini-torrent",
            "download_piece",
            "-o",
            "/tmp/piece-0",
            "sample.torrent",
            "0",
        ])
        .unwrap();
        assert_eq!(
            args.command,
            Command::DownloadPiece {
                output: PathBuf::from("/tmp/piece-0"),
                torrent: PathBuf::from("sample.torrent"),
                index: 0,
            }
        );

        let args = CliArgs::try_parse_from(["mini-torrent", "magnet_parse", "magnet:?xt=urn:btih:00"]).unwrap();
        assert!(matches!(args.command, Command::MagnetParse { .. }));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = CliArgs::try_parse_from(["mini-torrent", "peers", "a.torrent", "-v", "--read-timeout", "5"]).unwrap();
        assert!(args.is_verbose());
        assert_eq!(args.read_timeout, 5);
        assert_eq!(args.log_level(), tracing::Level::DEBUG);
    }
}
