use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Room already exists: {0}")]
    RoomAlreadyExists(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(&'static str),

    #[error("Video is already in the queue")]
    VideoAlreadyQueued,

    #[error("Video not found")]
    VideoNotFound,

    #[error("Impossible promotion")]
    ImpossiblePromotion,

    #[error("Client not found in room: {0}")]
    ClientNotFoundInRoom(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Extractor error: {0}")]
    Extractor(String),

    #[error("User lookup failed: {0}")]
    UserLookup(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
