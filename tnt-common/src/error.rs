use thiserror::Error;

/// Error taxonomy shared across the crate boundary: transport errors stay in
/// `tnt-ssh`, everything that can surface out of the room/log/session core
/// collapses into this enum.
#[derive(Error, Debug)]
pub enum TntError {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("message log error: {0}")]
    Log(String),

    #[error("room is at capacity")]
    RoomFull,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
