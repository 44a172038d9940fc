//! Protocol error kinds and their wire status mapping.
//!
//! Every command handler reports failure through [`ProtoError`]; the
//! variant decides the `status` code sent to the client and, for the
//! HTTP ingress, the response status. Unexpected internal errors are
//! narrowed to `InvalidData` before they reach the wire.

use crate::storage::StoreError;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtoError {
    #[error("channel already exists")]
    ChannelExists,
    #[error("no data to store")]
    NoDataToStore,
    #[error("invalid channel identifier")]
    InvalidChannel,
    #[error("no record found")]
    NoRecord,
    #[error("missing required fields for command")]
    MissingData,
    #[error("no channel identifier specified")]
    NoChannel,
    #[error("invalid command")]
    InvalidCommand,
    #[error("an invalid value was specified")]
    InvalidData,
    #[error("unknown command")]
    UnknownCommand,
    #[error("client sent too many pings")]
    TooManyPings,
    #[error("an unexpected error occurred")]
    Server,
}

impl ProtoError {
    /// Wire status for this error, shared by frame replies and the
    /// HTTP ingress.
    pub fn status(self) -> u16 {
        match self {
            Self::ChannelExists | Self::NoDataToStore | Self::InvalidChannel | Self::NoRecord => {
                503
            }
            Self::MissingData
            | Self::NoChannel
            | Self::InvalidCommand
            | Self::InvalidData
            | Self::UnknownCommand
            | Self::TooManyPings => 401,
            Self::Server => 500,
        }
    }
}

impl From<StoreError> for ProtoError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ChannelExists => Self::ChannelExists,
            StoreError::NoRecord => Self::NoRecord,
            StoreError::InvalidKey => Self::InvalidChannel,
        }
    }
}
