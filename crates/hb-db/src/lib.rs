pub mod memory;
pub mod models;
pub mod store;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

pub use memory::MemoryHostStore;
pub use models::{Host, HostRecordUpdate, HostStatus, NewHost};
pub use store::{HostStore, PgHostStore, StoreError};

/// Create a connection pool to PostgreSQL.
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
}

/// Run embedded migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
