use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

// ── HostStatus ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "host_status", rename_all = "lowercase")]
#[serde(rename_all = "UPPERCASE")]
pub enum HostStatus {
    Creating,
    Running,
    Stopped,
    Error,
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Creating => "CREATING",
            Self::Running => "RUNNING",
            Self::Stopped => "STOPPED",
            Self::Error => "ERROR",
        })
    }
}

// ── Host ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Host {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub vm_id: Option<String>,
    pub vm_name: Option<String>,
    pub address: Option<String>,
    pub web_port: Option<i32>,
    pub ssh_port: Option<i32>,
    pub status: HostStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct NewHost<'a> {
    pub owner_id: Uuid,
    pub name: &'a str,
}

/// Full replacement of everything a create pipeline learns about a host.
/// `None` clears the column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostRecordUpdate {
    pub status: Option<HostStatus>,
    pub vm_id: Option<String>,
    pub vm_name: Option<String>,
    pub address: Option<String>,
    pub web_port: Option<i32>,
    pub ssh_port: Option<i32>,
}

impl Host {
    pub async fn insert(pool: &PgPool, host: &NewHost<'_>) -> sqlx::Result<Self> {
        sqlx::query_as(
            r#"INSERT INTO hosts (owner_id, name, status)
               VALUES ($1, $2, 'creating')
               RETURNING *"#,
        )
        .bind(host.owner_id)
        .bind(host.name)
        .fetch_one(pool)
        .await
    }

    pub async fn get_by_id(pool: &PgPool, id: Uuid) -> sqlx::Result<Option<Self>> {
        sqlx::query_as("SELECT * FROM hosts WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn get_for_owner(pool: &PgPool, owner_id: Uuid, id: Uuid) -> sqlx::Result<Option<Self>> {
        sqlx::query_as("SELECT * FROM hosts WHERE id = $1 AND owner_id = $2")
            .bind(id)
            .bind(owner_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn exists_for_owner(pool: &PgPool, owner_id: Uuid, name: &str) -> sqlx::Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM hosts WHERE owner_id = $1 AND name = $2)",
        )
        .bind(owner_id)
        .bind(name)
        .fetch_one(pool)
        .await?;
        Ok(exists)
    }

    /// Newest first.
    pub async fn list_for_owner(pool: &PgPool, owner_id: Uuid) -> sqlx::Result<Vec<Self>> {
        sqlx::query_as("SELECT * FROM hosts WHERE owner_id = $1 ORDER BY created_at DESC")
            .bind(owner_id)
            .fetch_all(pool)
            .await
    }

    /// Hosts whose runtime state is worth polling: they have a VM and are past creation.
    pub async fn list_reconcilable(pool: &PgPool) -> sqlx::Result<Vec<Self>> {
        sqlx::query_as(
            r#"SELECT * FROM hosts
               WHERE vm_id IS NOT NULL AND status IN ('running', 'stopped', 'error')
               ORDER BY created_at"#,
        )
        .fetch_all(pool)
        .await
    }

    /// `(web_port, ssh_port)` of every host holding a pair.
    pub async fn held_ports(pool: &PgPool) -> sqlx::Result<Vec<(i32, i32)>> {
        sqlx::query_as(
            "SELECT web_port, ssh_port FROM hosts WHERE web_port IS NOT NULL AND ssh_port IS NOT NULL",
        )
        .fetch_all(pool)
        .await
    }

    pub async fn update_record(
        pool: &PgPool,
        id: Uuid,
        update: &HostRecordUpdate,
    ) -> sqlx::Result<Option<Self>> {
        sqlx::query_as(
            r#"UPDATE hosts
               SET status     = COALESCE($1, status),
                   vm_id      = $2,
                   vm_name    = $3,
                   address    = $4,
                   web_port   = $5,
                   ssh_port   = $6,
                   updated_at = now()
               WHERE id = $7
               RETURNING *"#,
        )
        .bind(update.status)
        .bind(update.vm_id.as_deref())
        .bind(update.vm_name.as_deref())
        .bind(update.address.as_deref())
        .bind(update.web_port)
        .bind(update.ssh_port)
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn set_status(pool: &PgPool, id: Uuid, status: HostStatus) -> sqlx::Result<Option<Self>> {
        sqlx::query_as("UPDATE hosts SET status = $1, updated_at = now() WHERE id = $2 RETURNING *")
            .bind(status)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn delete(pool: &PgPool, id: Uuid) -> sqlx::Result<bool> {
        let result = sqlx::query("DELETE FROM hosts WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
