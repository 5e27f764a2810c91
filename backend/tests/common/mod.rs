use calendar_backend::store::{MemoryStore, PgStore, Store};
use std::sync::Arc;

/// Creates a store based on the TEST_BACKEND env var.
///
/// - "memory" or unset: `MemoryStore`
/// - "postgres": `PgStore` in a fresh schema of the database at
///   TEST_POSTGRES_URL
///
/// ```bash
/// TEST_BACKEND=postgres TEST_POSTGRES_URL=postgres://localhost/calendar_test cargo test
/// ```
pub async fn test_store() -> Arc<dyn Store> {
    match std::env::var("TEST_BACKEND").as_deref() {
        Ok("postgres") => {
            let url = std::env::var("TEST_POSTGRES_URL")
                .unwrap_or_else(|_| "postgres://localhost/calendar_test".to_string());
            Arc::new(
                PgStore::connect_isolated(&url)
                    .await
                    .expect("Failed to connect to PostgreSQL"),
            )
        }
        Ok("memory") | Ok("") | Err(_) => Arc::new(MemoryStore::new()),
        Ok(other) => panic!("Unknown TEST_BACKEND value: {other}. Supported: memory, postgres"),
    }
}
