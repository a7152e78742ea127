//! mini-torrent - Main entry point
//!
//! Command-driven BitTorrent client. Command output goes to stdout, logs to
//! stderr.

use anyhow::{Context, Result};
use mini_torrent::{
    bencode, fetch_metadata_from_peers, write_pieces, AnnounceRequest, CliArgs, Command, Config, DownloadManager,
    FileSink, MagnetInfo, MagnetParser, PeerConnection, PieceWorkQueue, ReqwestTransport, TorrentError,
    TorrentInfo, TorrentParser, TrackerClient,
};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};

/// `left` announced for a magnet link whose length is not yet known
const MAGNET_PLACEHOLDER_LEFT: u64 = 999;

/// Set up panic handler for unexpected errors
fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();
        if let Some(location) = panic_info.location() {
            error!("PANIC occurred at {}:{}:{}", location.file(), location.line(), location.column());
        }
        let payload = panic_info.payload();
        if let Some(s) = payload.downcast_ref::<&str>() {
            error!("Panic message: {}", s);
        } else if let Some(s) = payload.downcast_ref::<String>() {
            error!("Panic message: {}", s);
        } else {
            error!("Panic message: unknown");
        }
        error!("Backtrace:\n{:?}", backtrace);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_panic_handler();

    let args = CliArgs::parse_args();
    init_logging(&args);
    debug!("CLI arguments: {:?}", args);

    let config = Config::from_args(&args);
    config.validate().context("Invalid configuration")?;
    debug!("Using peer id {}", config.peer_id_hex());

    run(args.command, &config).await.map_err(|e| {
        error!("{}", e);
        e
    })
}

/// Initialize logging based on verbosity settings. Logs go to stderr.
fn init_logging(args: &CliArgs) {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(args.log_level())
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if args.is_verbose() {
        subscriber.pretty().init();
    } else {
        subscriber.compact().init();
    }
}

async fn run(command: Command, config: &Config) -> Result<()> {
    match command {
        Command::Decode { value } => {
            let decoded = bencode::decode(value.as_bytes())?;
            println!("{}", serde_json::to_string(&decoded)?);
        }
        Command::Info { torrent } => {
            let torrent = TorrentParser::parse_file(&torrent)?;
            print_info(&torrent);
        }
        Command::Peers { torrent } => {
            let torrent = TorrentParser::parse_file(&torrent)?;
            for peer in discover_peers(config, torrent.announce(), *torrent.info_hash(), torrent.total_length()).await? {
                println!("{}", peer);
            }
        }
        Command::Handshake { torrent, peer } => {
            let torrent = TorrentParser::parse_file(&torrent)?;
            let addr: SocketAddr = peer.parse().map_err(TorrentError::from)?;
            let conn = PeerConnection::connect(addr, *torrent.info_hash(), config.peer_id, false, &config.connection).await?;
            println!("Peer ID: {}", hex::encode(conn.peer_id()));
        }
        Command::DownloadPiece { output, torrent, index } => {
            let torrent = TorrentParser::parse_file(&torrent)?;
            let peers = discover_peers(config, torrent.announce(), *torrent.info_hash(), torrent.total_length()).await?;
            let piece = DownloadManager::new(config.connection, config.peer_id)
                .download_piece(&torrent, &peers, index)
                .await?;
            write_output(&output, &[piece]).await?;
            println!("Piece {} downloaded to {}.", index, output.display());
        }
        Command::Download { output, torrent: path } => {
            let torrent = TorrentParser::parse_file(&path)?;
            let peers = discover_peers(config, torrent.announce(), *torrent.info_hash(), torrent.total_length()).await?;
            download(config, torrent, &peers, false, &output).await?;
            println!("Downloaded {} to {}.", path.display(), output.display());
        }
        Command::MagnetParse { uri } => {
            let magnet = MagnetParser::parse(&uri)?;
            println!("Tracker URL: {}", magnet.tracker().unwrap_or_default());
            println!("Info Hash: {}", magnet.info_hash_hex());
        }
        Command::MagnetHandshake { uri } => {
            let magnet = MagnetParser::parse(&uri)?;
            let peers = magnet_peers(config, &magnet).await?;
            let addr = *peers
                .first()
                .ok_or_else(|| TorrentError::no_peers_available("tracker returned no peers"))?;

            let mut conn = PeerConnection::connect(addr, magnet.info_hash, config.peer_id, true, &config.connection).await?;
            println!("Peer ID: {}", hex::encode(conn.peer_id()));
            let metadata_id = conn.peer_metadata_id().await?;
            println!("Peer Metadata Extension ID: {}", metadata_id);
        }
        Command::MagnetInfo { uri } => {
            let magnet = MagnetParser::parse(&uri)?;
            let peers = magnet_peers(config, &magnet).await?;
            let torrent = fetch_metadata_from_peers(&magnet, &peers, config.peer_id, &config.connection).await?;
            print_info(&torrent);
        }
        Command::MagnetDownloadPiece { output, uri, index } => {
            let magnet = MagnetParser::parse(&uri)?;
            let peers = magnet_peers(config, &magnet).await?;
            let torrent = fetch_metadata_from_peers(&magnet, &peers, config.peer_id, &config.connection).await?;
            let piece = DownloadManager::new(config.connection, config.peer_id)
                .with_extensions(true)
                .download_piece(&torrent, &peers, index)
                .await?;
            write_output(&output, &[piece]).await?;
            println!("Piece {} downloaded to {}.", index, output.display());
        }
        Command::MagnetDownload { output, uri } => {
            let magnet = MagnetParser::parse(&uri)?;
            let peers = magnet_peers(config, &magnet).await?;
            let torrent = fetch_metadata_from_peers(&magnet, &peers, config.peer_id, &config.connection).await?;
            download(config, torrent, &peers, true, &output).await?;
            println!("Downloaded {} to {}.", magnet.display_name.as_deref().unwrap_or("magnet"), output.display());
        }
    }
    Ok(())
}

fn print_info(torrent: &TorrentInfo) {
    println!("Tracker URL: {}", torrent.announce());
    println!("Length: {}", torrent.total_length());
    println!("Info Hash: {}", torrent.info_hash_hex());
    println!("Piece Length: {}", torrent.piece_length());
    println!("Piece Hashes:");
    for hash in torrent.piece_hashes_hex() {
        println!("{}", hash);
    }
}

async fn discover_peers(config: &Config, tracker_url: &str, info_hash: [u8; 20], left: u64) -> Result<Vec<SocketAddr>> {
    if tracker_url.is_empty() {
        return Err(TorrentError::tracker_error("no tracker URL to announce to").into());
    }
    let client = TrackerClient::new(Arc::new(ReqwestTransport::new()?));
    let request = AnnounceRequest::new(info_hash, config.peer_id, config.port, left);
    let peers = client.announce(tracker_url, &request).await?;
    Ok(peers.into_iter().map(SocketAddr::V4).collect())
}

async fn magnet_peers(config: &Config, magnet: &MagnetInfo) -> Result<Vec<SocketAddr>> {
    let tracker = magnet
        .tracker()
        .ok_or_else(|| TorrentError::tracker_error("magnet link has no tracker"))?;
    let left = magnet.total_size.unwrap_or(MAGNET_PLACEHOLDER_LEFT);
    discover_peers(config, tracker, magnet.info_hash, left).await
}

async fn download(config: &Config, torrent: TorrentInfo, peers: &[SocketAddr], extended: bool, output: &Path) -> Result<()> {
    let piece_count = u32::try_from(torrent.piece_count())
        .map_err(|_| TorrentError::invalid_torrent("too many pieces"))?;
    let queue = Arc::new(PieceWorkQueue::new(piece_count));
    info!("Downloading {} ({} bytes, {} pieces)", torrent.info_hash_hex(), torrent.total_length(), piece_count);

    let pieces = DownloadManager::new(config.connection, config.peer_id)
        .with_extensions(extended)
        .download_all(Arc::new(torrent), peers, queue)
        .await?;
    write_output(output, &pieces).await
}

async fn write_output(output: &Path, pieces: &[bytes::Bytes]) -> Result<()> {
    let mut sink = FileSink::create(output).await?;
    write_pieces(pieces, &mut sink).await?;
    debug!("{} bytes written", sink.bytes_written());
    Ok(())
}
