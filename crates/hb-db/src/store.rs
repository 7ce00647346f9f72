use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Host, HostRecordUpdate, HostStatus, NewHost};

/// Unique constraint on `(owner_id, name)`.
const OWNER_NAME_CONSTRAINT: &str = "hosts_owner_name_key";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("host name already in use: {0}")]
    Duplicate(String),

    #[error("host not found: {0}")]
    NotFound(Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Persistence for host records. Every write returns the row as stored.
#[async_trait]
pub trait HostStore: Send + Sync + 'static {
    /// Insert a `CREATING` host. A name the owner already uses is `Duplicate`.
    async fn insert(&self, host: NewHost<'_>) -> Result<Host>;

    async fn get(&self, id: Uuid) -> Result<Option<Host>>;

    async fn get_for_owner(&self, owner_id: Uuid, id: Uuid) -> Result<Option<Host>>;

    async fn exists_for_owner(&self, owner_id: Uuid, name: &str) -> Result<bool>;

    /// Newest first.
    async fn list_for_owner(&self, owner_id: Uuid) -> Result<Vec<Host>>;

    /// Hosts with a VM id in `RUNNING`, `STOPPED` or `ERROR`.
    async fn list_reconcilable(&self) -> Result<Vec<Host>>;

    /// `(web_port, ssh_port)` of every host holding a pair.
    async fn held_ports(&self) -> Result<Vec<(i32, i32)>>;

    async fn update_record(&self, id: Uuid, update: &HostRecordUpdate) -> Result<Host>;

    async fn set_status(&self, id: Uuid, status: HostStatus) -> Result<Host>;

    /// `false` when there was nothing to delete.
    async fn delete(&self, id: Uuid) -> Result<bool>;
}

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PgHostStore {
    pool: PgPool,
}

impl PgHostStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn is_owner_name_violation(e: &sqlx::Error) -> bool {
    e.as_database_error().is_some_and(|db| {
        db.is_unique_violation() && db.constraint() == Some(OWNER_NAME_CONSTRAINT)
    })
}

#[async_trait]
impl HostStore for PgHostStore {
    async fn insert(&self, host: NewHost<'_>) -> Result<Host> {
        Host::insert(&self.pool, &host).await.map_err(|e| {
            if is_owner_name_violation(&e) {
                StoreError::Duplicate(host.name.to_string())
            } else {
                StoreError::Database(e)
            }
        })
    }

    async fn get(&self, id: Uuid) -> Result<Option<Host>> {
        Ok(Host::get_by_id(&self.pool, id).await?)
    }

    async fn get_for_owner(&self, owner_id: Uuid, id: Uuid) -> Result<Option<Host>> {
        Ok(Host::get_for_owner(&self.pool, owner_id, id).await?)
    }

    async fn exists_for_owner(&self, owner_id: Uuid, name: &str) -> Result<bool> {
        Ok(Host::exists_for_owner(&self.pool, owner_id, name).await?)
    }

    async fn list_for_owner(&self, owner_id: Uuid) -> Result<Vec<Host>> {
        Ok(Host::list_for_owner(&self.pool, owner_id).await?)
    }

    async fn list_reconcilable(&self) -> Result<Vec<Host>> {
        Ok(Host::list_reconcilable(&self.pool).await?)
    }

    async fn held_ports(&self) -> Result<Vec<(i32, i32)>> {
        Ok(Host::held_ports(&self.pool).await?)
    }

    async fn update_record(&self, id: Uuid, update: &HostRecordUpdate) -> Result<Host> {
        Host::update_record(&self.pool, id, update)
            .await?
            .ok_or(StoreError::NotFound(id))
    }

    async fn set_status(&self, id: Uuid, status: HostStatus) -> Result<Host> {
        Host::set_status(&self.pool, id, status)
            .await?
            .ok_or(StoreError::NotFound(id))
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(Host::delete(&self.pool, id).await?)
    }
}
