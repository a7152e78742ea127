//! Storage module
//!
//! Piece assembly and validation, the shared work queue, the download
//! orchestrator and output sinks.

pub mod download;
pub mod piece;
pub mod queue;
pub mod sink;

pub use download::DownloadManager;
pub use piece::{verify_piece, BlockSpec, PieceBuffer};
pub use queue::{PieceClaim, PieceWorkQueue};
pub use sink::{write_pieces, FileSink, PieceSink};
