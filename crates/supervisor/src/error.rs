use fsv_common::ConfigError;
use fsv_storage::StoreError;
use thiserror::Error;

use crate::account::FarmerState;
use crate::fsm::FarmerEvent;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("key not found")]
    NotFound,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("event {event} inappropriate in current state {from}")]
    InvalidTransition { event: FarmerEvent, from: FarmerState },

    #[error("farmer is {0}, operation requires ONLINE or LOST")]
    NotOnline(FarmerState),

    #[error("current lost count <= 0")]
    NoMissedPing,

    #[error("challenge verification failed: {0}")]
    VerificationFailed(String),

    #[error("block source error: {0}")]
    BlockSource(String),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("account codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("controller is closed")]
    Closed,
}

/// Error classes reported across the API boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorType {
    None,
    NotFound,
    InvalidArgument,
    InvalidTransition,
    VerificationFailed,
    Storage,
    Internal,
}

impl SupervisorError {
    pub fn kind(&self) -> ErrorType {
        match self {
            SupervisorError::NotFound => ErrorType::NotFound,
            SupervisorError::InvalidArgument(_) => ErrorType::InvalidArgument,
            SupervisorError::InvalidTransition { .. }
            | SupervisorError::NotOnline(_)
            | SupervisorError::NoMissedPing => {
                ErrorType::InvalidTransition
            }
            SupervisorError::VerificationFailed(_) => ErrorType::VerificationFailed,
            SupervisorError::Storage(_) => ErrorType::Storage,
            SupervisorError::BlockSource(_) => ErrorType::VerificationFailed,
            SupervisorError::Config(_) | SupervisorError::Codec(_) | SupervisorError::Closed => {
                ErrorType::Internal
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, SupervisorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(SupervisorError::NotFound.kind(), ErrorType::NotFound);
        assert_eq!(SupervisorError::NoMissedPing.kind(), ErrorType::InvalidTransition);
        assert_eq!(
            SupervisorError::Storage(StoreError::Closed).kind(),
            ErrorType::Storage
        );
        assert_eq!(SupervisorError::Closed.kind(), ErrorType::Internal);
    }

    #[test]
    fn test_transition_message() {
        let err = SupervisorError::InvalidTransition {
            event: FarmerEvent::Online,
            from: FarmerState::Online,
        };
        assert_eq!(err.to_string(), "event online inappropriate in current state ONLINE");
    }
}
