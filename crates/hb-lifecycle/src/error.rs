use hb_db::{HostStatus, StoreError};
use hb_infra::provision::ProvisionError;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("invalid host name {0:?}: use 3-50 letters, digits or '-'")]
    InvalidHostName(String),

    #[error("host name already in use: {0}")]
    DuplicateHostName(String),

    #[error("host not found: {0}")]
    HostNotFound(Uuid),

    #[error("cannot {action} host {id} while {status}")]
    InvalidState {
        id: Uuid,
        status: HostStatus,
        action: &'static str,
    },

    #[error(transparent)]
    Infra(#[from] hb_infra::Error),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("pipeline task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<StoreError> for LifecycleError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate(name) => Self::DuplicateHostName(name),
            StoreError::NotFound(id) => Self::HostNotFound(id),
            other => Self::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, LifecycleError>;
