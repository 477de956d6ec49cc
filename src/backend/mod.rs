//! Backend collaborators: the update executor consumed by the cache and the
//! wider store interface consumed by the connection.

mod http_store;
mod oxigraph_store;
pub mod results;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
pub use http_store::HttpStore;
pub use oxigraph_store::{triple_from_quad, OxigraphStore};

use crate::core::Value;
use crate::error::{Error, Result};

/// Opaque handle to a backend transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionHandle(u64);

impl TransactionHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// One solution of a SELECT query, keyed by variable name
pub type Binding = HashMap<String, Value>;

/// Submits update statements to the store.
///
/// The cache only looks at success or failure.
#[async_trait]
pub trait UpdateExecutor: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Execute a SPARQL UPDATE, inside `transaction` when given
    async fn submit(&self, update: &str, transaction: Option<&TransactionHandle>) -> Result<()>;
}

/// Full store surface used by a connection
#[async_trait]
pub trait RemoteStore: UpdateExecutor {
    async fn begin(&self) -> Result<TransactionHandle>;

    async fn commit(&self, transaction: &TransactionHandle) -> Result<()>;

    async fn rollback(&self, transaction: &TransactionHandle) -> Result<()>;

    /// Execute a SPARQL SELECT
    async fn select(
        &self,
        query: &str,
        transaction: Option<&TransactionHandle>,
    ) -> Result<Vec<Binding>>;

    /// Execute a SPARQL ASK
    async fn ask(&self, query: &str, transaction: Option<&TransactionHandle>) -> Result<bool>;
}

/// Bookkeeping for transactions the store emulates client-side
pub(crate) struct TransactionTable<T> {
    next_id: AtomicU64,
    open: Mutex<HashMap<u64, T>>,
}

impl<T> TransactionTable<T> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            open: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn open(&self, state: T) -> Result<TransactionHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock()?.insert(id, state);
        Ok(TransactionHandle(id))
    }

    pub(crate) fn take(&self, handle: &TransactionHandle) -> Result<T> {
        self.lock()?.remove(&handle.0).ok_or_else(|| unknown(handle))
    }

    pub(crate) fn with<R>(
        &self,
        handle: &TransactionHandle,
        f: impl FnOnce(&mut T) -> Result<R>,
    ) -> Result<R> {
        let mut open = self.lock()?;
        let state = open.get_mut(&handle.0).ok_or_else(|| unknown(handle))?;
        f(state)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<u64, T>>> {
        self.open
            .lock()
            .map_err(|_| Error::Transaction("transaction table poisoned".to_string()))
    }
}

fn unknown(handle: &TransactionHandle) -> Error {
    Error::Transaction(format!("unknown transaction {}", handle.0))
}

/// Joins staged updates into one request so the backend applies them atomically.
pub(crate) fn join_updates(updates: &[String]) -> String {
    updates.join(" ;\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_table_lifecycle() {
        let table: TransactionTable<Vec<String>> = TransactionTable::new();
        let first = table.open(Vec::new()).unwrap();
        let second = table.open(Vec::new()).unwrap();
        assert_ne!(first, second);

        table
            .with(&first, |staged| {
                staged.push("INSERT DATA {}".to_string());
                Ok(())
            })
            .unwrap();
        assert_eq!(table.take(&first).unwrap().len(), 1);
        assert!(matches!(table.take(&first), Err(Error::Transaction(_))));
        assert!(table.take(&second).unwrap().is_empty());
    }

    #[test]
    fn test_join_updates() {
        let joined = join_updates(&["INSERT DATA {}".to_string(), "DELETE DATA {}".to_string()]);
        assert_eq!(joined, "INSERT DATA {} ;\nDELETE DATA {}");
    }
}
