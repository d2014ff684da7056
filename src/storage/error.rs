use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid piece index: {0}")]
    InvalidPiece(u32),

    #[error("piece {0} not available")]
    PieceNotAvailable(u32),

    #[error("region out of range: piece {piece}, begin {begin}, length {length}")]
    OutOfRange { piece: u32, begin: u32, length: u32 },

    #[error("block already reserved: piece {piece}, begin {begin}")]
    AlreadyReserved { piece: u32, begin: u32 },
}
