use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{Host, HostRecordUpdate, HostStatus, NewHost};
use crate::store::{HostStore, Result, StoreError};

#[derive(Default)]
struct Table {
    rows: HashMap<Uuid, (u64, Host)>,
    next_seq: u64,
}

impl Table {
    /// Rows in insertion order.
    fn ordered(&self) -> Vec<Host> {
        let mut rows: Vec<_> = self.rows.values().collect();
        rows.sort_by_key(|(seq, _)| *seq);
        rows.into_iter().map(|(_, host)| host.clone()).collect()
    }
}

/// In-process store with the same uniqueness rules as the PostgreSQL schema.
/// Backs the test suites and database-less runs.
#[derive(Default)]
pub struct MemoryHostStore {
    table: RwLock<Table>,
}

impl MemoryHostStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl HostStore for MemoryHostStore {
    async fn insert(&self, host: NewHost<'_>) -> Result<Host> {
        let mut table = self.table.write().await;
        let taken = table
            .rows
            .values()
            .any(|(_, h)| h.owner_id == host.owner_id && h.name == host.name);
        if taken {
            return Err(StoreError::Duplicate(host.name.to_string()));
        }

        let now = Utc::now();
        let row = Host {
            id: Uuid::new_v4(),
            owner_id: host.owner_id,
            name: host.name.to_string(),
            vm_id: None,
            vm_name: None,
            address: None,
            web_port: None,
            ssh_port: None,
            status: HostStatus::Creating,
            created_at: now,
            updated_at: now,
        };
        let seq = table.next_seq;
        table.next_seq += 1;
        table.rows.insert(row.id, (seq, row.clone()));
        Ok(row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Host>> {
        Ok(self.table.read().await.rows.get(&id).map(|(_, h)| h.clone()))
    }

    async fn get_for_owner(&self, owner_id: Uuid, id: Uuid) -> Result<Option<Host>> {
        Ok(self.get(id).await?.filter(|h| h.owner_id == owner_id))
    }

    async fn exists_for_owner(&self, owner_id: Uuid, name: &str) -> Result<bool> {
        Ok(self
            .table
            .read()
            .await
            .rows
            .values()
            .any(|(_, h)| h.owner_id == owner_id && h.name == name))
    }

    async fn list_for_owner(&self, owner_id: Uuid) -> Result<Vec<Host>> {
        let mut hosts: Vec<Host> = self
            .table
            .read()
            .await
            .ordered()
            .into_iter()
            .filter(|h| h.owner_id == owner_id)
            .collect();
        hosts.reverse();
        Ok(hosts)
    }

    async fn list_reconcilable(&self) -> Result<Vec<Host>> {
        Ok(self
            .table
            .read()
            .await
            .ordered()
            .into_iter()
            .filter(|h| {
                h.vm_id.is_some()
                    && matches!(
                        h.status,
                        HostStatus::Running | HostStatus::Stopped | HostStatus::Error
                    )
            })
            .collect())
    }

    async fn held_ports(&self) -> Result<Vec<(i32, i32)>> {
        Ok(self
            .table
            .read()
            .await
            .rows
            .values()
            .filter_map(|(_, h)| Some((h.web_port?, h.ssh_port?)))
            .collect())
    }

    async fn update_record(&self, id: Uuid, update: &HostRecordUpdate) -> Result<Host> {
        let mut table = self.table.write().await;
        let (_, host) = table.rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if let Some(status) = update.status {
            host.status = status;
        }
        host.vm_id = update.vm_id.clone();
        host.vm_name = update.vm_name.clone();
        host.address = update.address.clone();
        host.web_port = update.web_port;
        host.ssh_port = update.ssh_port;
        host.updated_at = Utc::now();
        Ok(host.clone())
    }

    async fn set_status(&self, id: Uuid, status: HostStatus) -> Result<Host> {
        let mut table = self.table.write().await;
        let (_, host) = table.rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        host.status = status;
        host.updated_at = Utc::now();
        Ok(host.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.table.write().await.rows.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_host(owner_id: Uuid, name: &str) -> NewHost<'_> {
        NewHost { owner_id, name }
    }

    #[tokio::test]
    async fn insert_starts_creating() {
        let store = MemoryHostStore::new();
        let owner = Uuid::new_v4();
        let host = store.insert(new_host(owner, "demo-site")).await.unwrap();

        assert_eq!(host.status, HostStatus::Creating);
        assert_eq!(host.vm_id, None);
        assert_eq!(host.created_at, host.updated_at);
        assert!(store.exists_for_owner(owner, "demo-site").await.unwrap());
    }

    #[tokio::test]
    async fn names_are_unique_per_owner() {
        let store = MemoryHostStore::new();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        store.insert(new_host(alice, "blog")).await.unwrap();

        let err = store.insert(new_host(alice, "blog")).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(name) if name == "blog"));
        store.insert(new_host(bob, "blog")).await.unwrap();
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn list_is_newest_first_and_scoped() {
        let store = MemoryHostStore::new();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        store.insert(new_host(alice, "one")).await.unwrap();
        store.insert(new_host(bob, "other")).await.unwrap();
        store.insert(new_host(alice, "two")).await.unwrap();

        let names: Vec<_> = store
            .list_for_owner(alice)
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.name)
            .collect();
        assert_eq!(names, ["two", "one"]);
    }

    #[tokio::test]
    async fn record_update_replaces_fields() {
        let store = MemoryHostStore::new();
        let host = store.insert(new_host(Uuid::new_v4(), "site")).await.unwrap();

        let running = store
            .update_record(
                host.id,
                &HostRecordUpdate {
                    status: Some(HostStatus::Running),
                    vm_id: Some("uuid-1".into()),
                    vm_name: Some("webhosting-site-1".into()),
                    address: Some("10.0.2.15".into()),
                    web_port: Some(8000),
                    ssh_port: Some(2200),
                },
            )
            .await
            .unwrap();
        assert_eq!(running.status, HostStatus::Running);
        assert_eq!(store.held_ports().await.unwrap(), [(8000, 2200)]);
        assert_eq!(store.list_reconcilable().await.unwrap().len(), 1);

        let cleared = store
            .update_record(
                host.id,
                &HostRecordUpdate {
                    status: Some(HostStatus::Error),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(cleared.vm_id, None);
        assert_eq!(cleared.web_port, None);
        assert!(store.held_ports().await.unwrap().is_empty());
        assert!(store.list_reconcilable().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_rows() {
        let store = MemoryHostStore::new();
        let id = Uuid::new_v4();
        assert!(matches!(
            store.set_status(id, HostStatus::Stopped).await,
            Err(StoreError::NotFound(missing)) if missing == id
        ));
        assert!(!store.delete(id).await.unwrap());
        assert_eq!(store.get(id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn owner_scoping_on_get() {
        let store = MemoryHostStore::new();
        let owner = Uuid::new_v4();
        let host = store.insert(new_host(owner, "site")).await.unwrap();
        assert!(store.get_for_owner(owner, host.id).await.unwrap().is_some());
        assert!(store.get_for_owner(Uuid::new_v4(), host.id).await.unwrap().is_none());
    }
}
