//! Connection to a remote store with write-behind caching.
//!
//! The connection owns one write cache and one delete cache and forces them
//! to flush wherever buffered mutations could otherwise be observed out of
//! order: before reads, around transaction boundaries, before direct updates
//! and on close.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::backend::results::count_from;
use crate::backend::{Binding, RemoteStore, TransactionHandle, UpdateExecutor};
use crate::cache::buffer::MutationBuffer;
use crate::cache::serializer::{
    render_batch, render_iri, render_nquad, render_value, validate_triple, DeleteData, InsertData,
    UpdateVerb,
};
use crate::cache::{DeleteCache, WriteCache};
use crate::config::ConnectionConfig;
use crate::core::{Partition, Resource, Triple, Value};
use crate::error::{Error, Result};

/// Number of mutations waiting in each cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PendingMutations {
    pub additions: usize,
    pub removals: usize,
}

/// A connection to one store.
///
/// Every successful `add`/`remove` is indistinguishable, from this
/// connection's point of view, from having been applied immediately.
///
/// Inside a transaction this holds only if the backend can read its own
/// uncommitted updates. [`OxigraphStore`](crate::backend::OxigraphStore)
/// can; [`HttpStore`](crate::backend::HttpStore) stages transaction updates
/// client-side until commit, so reads issued before `commit` see committed
/// server state only.
pub struct Connection {
    store: Arc<dyn RemoteStore>,
    write_cache: WriteCache,
    delete_cache: DeleteCache,
    write_cached: bool,
    delete_cached: bool,
    transaction: Mutex<Option<TransactionHandle>>,
    close_lock: Mutex<()>,
    closed: AtomicBool,
}

impl Connection {
    /// Opens a connection and starts the flush schedulers. Must be called
    /// from within a Tokio runtime.
    pub async fn open<S: RemoteStore + 'static>(
        store: Arc<S>,
        config: ConnectionConfig,
    ) -> Result<Self> {
        let executor: Arc<dyn UpdateExecutor> = store.clone();
        let write_cached = config.write_cache.enabled;
        let delete_cached = config.delete_cache.enabled;
        let write_cache = WriteCache::new(InsertData, Arc::clone(&executor), config.write_cache)?;
        let delete_cache = DeleteCache::new(DeleteData, executor, config.delete_cache)?;
        write_cache.start().await;
        delete_cache.start().await;

        tracing::info!(
            backend = store.name(),
            write_cached,
            delete_cached,
            "Opened connection"
        );

        Ok(Self {
            store,
            write_cache,
            delete_cache,
            write_cached,
            delete_cached,
            transaction: Mutex::new(None),
            close_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    async fn current_transaction(&self) -> Option<TransactionHandle> {
        *self.transaction.lock().await
    }

    // ========== Mutations ==========

    /// Adds a statement to each of `contexts`, or to the default graph when
    /// `contexts` is empty.
    pub async fn add(
        &self,
        subject: &Resource,
        predicate: &str,
        object: &Value,
        contexts: &[Resource],
    ) -> Result<()> {
        self.add_triples(Triple::expand(subject, predicate, object, contexts)).await
    }

    pub async fn add_triples(&self, triples: Vec<Triple>) -> Result<()> {
        self.ensure_open()?;
        if triples.is_empty() {
            return Ok(());
        }
        validate_all(UpdateVerb::Insert, &triples)?;
        let partitions = partitions_of(&triples);
        // Pending removals in the same graphs must reach the store first.
        if self.delete_cache.touches(&partitions).await {
            self.delete_cache.flush().await?;
        }
        if self.write_cached {
            self.write_cache.add_triples(triples).await?;
            Ok(())
        } else {
            self.submit_direct(UpdateVerb::Insert, triples).await
        }
    }

    /// Removes a statement from each of `contexts`, or from the default graph
    /// when `contexts` is empty.
    pub async fn remove(
        &self,
        subject: &Resource,
        predicate: &str,
        object: &Value,
        contexts: &[Resource],
    ) -> Result<()> {
        self.ensure_open()?;
        let triples = Triple::expand(subject, predicate, object, contexts);
        validate_all(UpdateVerb::Delete, &triples)?;
        let partitions = partitions_of(&triples);
        if self.write_cache.touches(&partitions).await {
            self.write_cache.flush().await?;
        }
        if self.delete_cached {
            self.delete_cache.add_triples(triples).await?;
            Ok(())
        } else {
            self.submit_direct(UpdateVerb::Delete, triples).await
        }
    }

    async fn submit_direct(&self, verb: UpdateVerb, triples: Vec<Triple>) -> Result<()> {
        let mut batch = MutationBuffer::new(usize::MAX, std::time::Duration::MAX);
        for triple in triples {
            batch.push(triple);
        }
        let update = render_batch(verb, &batch)?;
        let transaction = self.current_transaction().await;
        self.store.submit(&update, transaction.as_ref()).await
    }

    /// Forces both caches to flush. Returns the number of triples submitted.
    pub async fn sync(&self) -> Result<usize> {
        self.ensure_open()?;
        self.flush_all().await
    }

    async fn flush_all(&self) -> Result<usize> {
        let added = self.write_cache.flush().await?;
        let removed = self.delete_cache.flush().await?;
        Ok(added + removed)
    }

    /// Runs a SPARQL update as-is, after flushing cached mutations.
    pub async fn update(&self, update: &str) -> Result<()> {
        self.ensure_open()?;
        self.flush_all().await?;
        let transaction = self.current_transaction().await;
        self.store.submit(update, transaction.as_ref()).await
    }

    /// Removes every statement in `contexts`, or in all graphs when empty.
    pub async fn clear(&self, contexts: &[Resource]) -> Result<()> {
        self.ensure_open()?;
        let update = if contexts.is_empty() {
            "CLEAR SILENT ALL".to_string()
        } else {
            let mut operations = Vec::new();
            for partition in Partition::all_of(contexts) {
                operations.push(match partition {
                    Partition::Default => "CLEAR SILENT DEFAULT".to_string(),
                    Partition::Named(context) => {
                        format!("CLEAR SILENT GRAPH {}", graph_term(&context)?)
                    }
                });
            }
            operations.join(" ;\n")
        };
        self.update(&update).await
    }

    // ========== Transactions ==========

    /// Starts a transaction. Mutations issued earlier are flushed outside it.
    pub async fn begin(&self) -> Result<()> {
        self.ensure_open()?;
        let mut transaction = self.transaction.lock().await;
        if transaction.is_some() {
            return Err(Error::Transaction("a transaction is already active".to_string()));
        }
        self.flush_all().await?;

        let handle = self.store.begin().await?;
        self.write_cache.bind_transaction(Some(handle)).await;
        self.delete_cache.bind_transaction(Some(handle)).await;
        *transaction = Some(handle);
        tracing::debug!(transaction = handle.id(), "Transaction started");
        Ok(())
    }

    /// Flushes cached mutations into the transaction, then commits it. If
    /// either step fails the transaction stays open, so `commit` can be
    /// retried or the transaction rolled back.
    pub async fn commit(&self) -> Result<()> {
        self.ensure_open()?;
        let mut transaction = self.transaction.lock().await;
        let handle = transaction
            .ok_or_else(|| Error::Transaction("no active transaction".to_string()))?;
        self.flush_all().await?;

        if let Err(e) = self.store.commit(&handle).await {
            tracing::warn!(transaction = handle.id(), error = %e, "Commit failed; transaction left open");
            return Err(e);
        }
        self.write_cache.bind_transaction(None).await;
        self.delete_cache.bind_transaction(None).await;
        *transaction = None;
        tracing::debug!(transaction = handle.id(), "Transaction committed");
        Ok(())
    }

    /// Flushes cached mutations into the transaction, then rolls it back.
    pub async fn rollback(&self) -> Result<()> {
        self.ensure_open()?;
        let mut transaction = self.transaction.lock().await;
        let handle = transaction
            .ok_or_else(|| Error::Transaction("no active transaction".to_string()))?;
        self.rollback_locked(&mut transaction, handle).await
    }

    async fn rollback_locked(
        &self,
        transaction: &mut Option<TransactionHandle>,
        handle: TransactionHandle,
    ) -> Result<()> {
        if let Err(e) = self.flush_all().await {
            // Everything buffered belongs to the transaction being discarded.
            let dropped = self.write_cache.discard().await + self.delete_cache.discard().await;
            tracing::warn!(
                transaction = handle.id(),
                dropped,
                error = %e,
                "Flush before rollback failed; discarded buffered mutations"
            );
        }
        self.write_cache.bind_transaction(None).await;
        self.delete_cache.bind_transaction(None).await;
        *transaction = None;
        self.store.rollback(&handle).await?;
        tracing::debug!(transaction = handle.id(), "Transaction rolled back");
        Ok(())
    }

    pub async fn is_active(&self) -> bool {
        self.transaction.lock().await.is_some()
    }

    // ========== Reads ==========

    /// Number of statements in `contexts`, or in all graphs when empty.
    pub async fn size(&self, contexts: &[Resource]) -> Result<u64> {
        self.ensure_open()?;
        self.flush_all().await?;
        let query = format!(
            "SELECT (COUNT(*) AS ?n) WHERE {{ {} }}",
            graph_pattern("?s ?p ?o", contexts)?
        );
        let transaction = self.current_transaction().await;
        let bindings = self.store.select(&query, transaction.as_ref()).await?;
        count_from(&bindings, "n")
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.size(&[]).await? == 0)
    }

    /// Whether a statement matching the pattern exists. `None` matches anything.
    pub async fn has_statement(
        &self,
        subject: Option<&Resource>,
        predicate: Option<&str>,
        object: Option<&Value>,
        contexts: &[Resource],
    ) -> Result<bool> {
        self.ensure_open()?;
        self.flush_all().await?;
        let pattern = triple_pattern(subject, predicate, object)?;
        let query = format!("ASK {{ {} }}", graph_pattern(&pattern, contexts)?);
        let transaction = self.current_transaction().await;
        self.store.ask(&query, transaction.as_ref()).await
    }

    /// Statements matching the pattern. `None` matches anything.
    pub async fn statements(
        &self,
        subject: Option<&Resource>,
        predicate: Option<&str>,
        object: Option<&Value>,
        contexts: &[Resource],
    ) -> Result<Vec<Triple>> {
        self.ensure_open()?;
        self.flush_all().await?;
        let pattern = triple_pattern(subject, predicate, object)?;
        let query = format!(
            "SELECT ?s ?p ?o ?g WHERE {{ {} }}",
            graph_pattern(&pattern, contexts)?
        );
        let transaction = self.current_transaction().await;
        let bindings = self.store.select(&query, transaction.as_ref()).await?;

        bindings
            .into_iter()
            .map(|row| statement_from(row, subject, predicate, object))
            .collect()
    }

    /// Statements in `contexts` (all graphs when empty) as N-Quads.
    pub async fn export(&self, contexts: &[Resource]) -> Result<String> {
        let statements = self.statements(None, None, None, contexts).await?;
        let mut out = String::new();
        for statement in &statements {
            out.push_str(&render_nquad(statement)?);
            out.push('\n');
        }
        Ok(out)
    }

    /// Runs a SPARQL SELECT after flushing cached mutations.
    pub async fn query(&self, query: &str) -> Result<Vec<Binding>> {
        self.ensure_open()?;
        self.flush_all().await?;
        let transaction = self.current_transaction().await;
        self.store.select(query, transaction.as_ref()).await
    }

    // ========== Cache control ==========

    pub async fn configure_write_cache(
        &self,
        initial_delay_ms: u64,
        tick_interval_ms: u64,
        capacity: usize,
    ) -> Result<()> {
        self.ensure_open()?;
        self.write_cache.configure(initial_delay_ms, tick_interval_ms, capacity).await
    }

    pub async fn configure_delete_cache(
        &self,
        initial_delay_ms: u64,
        tick_interval_ms: u64,
        capacity: usize,
    ) -> Result<()> {
        self.ensure_open()?;
        self.delete_cache.configure(initial_delay_ms, tick_interval_ms, capacity).await
    }

    pub async fn pending(&self) -> PendingMutations {
        PendingMutations {
            additions: self.write_cache.len().await,
            removals: self.delete_cache.len().await,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Flushes pending mutations, rolls back an open transaction and stops
    /// the schedulers. If the flush fails the connection stays open so the
    /// caller can retry. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        let _closing = self.close_lock.lock().await;
        if self.is_closed() {
            return Ok(());
        }

        self.flush_all().await?;

        {
            let mut transaction = self.transaction.lock().await;
            if let Some(handle) = *transaction {
                tracing::warn!(transaction = handle.id(), "Rolling back transaction left open at close");
                if let Err(e) = self.rollback_locked(&mut transaction, handle).await {
                    tracing::warn!(error = %e, "Rollback at close failed");
                }
            }
        }

        let added = self.write_cache.stop_and_flush().await?;
        let removed = self.delete_cache.stop_and_flush().await?;
        self.closed.store(true, Ordering::SeqCst);
        tracing::info!(
            backend = self.store.name(),
            late_flushed = added + removed,
            "Closed connection"
        );
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.is_closed() {
            tracing::warn!(
                backend = self.store.name(),
                "Connection dropped without close(); unflushed mutations are lost"
            );
        }
    }
}

/// Rejects a mutation up front so that neither cache is flushed or fed on its behalf.
fn validate_all(verb: UpdateVerb, triples: &[Triple]) -> Result<()> {
    for triple in triples {
        validate_triple(verb, triple)?;
    }
    Ok(())
}

fn partitions_of(triples: &[Triple]) -> Vec<Partition> {
    let mut partitions = Vec::new();
    for triple in triples {
        let partition = triple.partition();
        if !partitions.contains(&partition) {
            partitions.push(partition);
        }
    }
    partitions
}

fn graph_term(context: &Resource) -> Result<String> {
    match context {
        Resource::Iri(iri) => Ok(render_iri(iri)?),
        Resource::Blank(label) => Err(Error::Query(format!(
            "blank node _:{} cannot address a graph",
            label
        ))),
    }
}

/// Group graph pattern over the requested graphs. `?g` is bound for named graphs only.
fn graph_pattern(pattern: &str, contexts: &[Resource]) -> Result<String> {
    if contexts.is_empty() {
        return Ok(format!("{{ {} }} UNION {{ GRAPH ?g {{ {} }} }}", pattern, pattern));
    }
    let mut blocks = Vec::new();
    for partition in Partition::all_of(contexts) {
        blocks.push(match partition {
            Partition::Default => format!("{{ {} }}", pattern),
            Partition::Named(context) => {
                let graph = graph_term(&context)?;
                format!("{{ GRAPH {} {{ {} }} BIND({} AS ?g) }}", graph, pattern, graph)
            }
        });
    }
    Ok(blocks.join(" UNION "))
}

fn triple_pattern(
    subject: Option<&Resource>,
    predicate: Option<&str>,
    object: Option<&Value>,
) -> Result<String> {
    let subject = match subject {
        Some(Resource::Iri(iri)) => render_iri(iri)?,
        Some(Resource::Blank(label)) => return Err(blank_in_pattern(label)),
        None => "?s".to_string(),
    };
    let predicate = match predicate {
        Some(iri) => render_iri(iri)?,
        None => "?p".to_string(),
    };
    let object = match object {
        Some(Value::Blank(label)) => return Err(blank_in_pattern(label)),
        Some(value) => render_value(value, UpdateVerb::Insert)?,
        None => "?o".to_string(),
    };
    Ok(format!("{} {} {}", subject, predicate, object))
}

fn blank_in_pattern(label: &str) -> Error {
    Error::Query(format!("blank node _:{} cannot be matched by a query pattern", label))
}

fn statement_from(
    mut row: Binding,
    subject: Option<&Resource>,
    predicate: Option<&str>,
    object: Option<&Value>,
) -> Result<Triple> {
    let subject = match subject {
        Some(subject) => subject.clone(),
        None => as_resource(row.remove("s"), "subject")?,
    };
    let predicate = match predicate {
        Some(predicate) => predicate.to_string(),
        None => match row.remove("p") {
            Some(Value::Iri(iri)) => iri,
            other => return Err(Error::Query(format!("unexpected predicate {:?}", other))),
        },
    };
    let object = match object {
        Some(object) => object.clone(),
        None => row
            .remove("o")
            .ok_or_else(|| Error::Query("solution without object".to_string()))?,
    };
    let context = match row.remove("g") {
        Some(value) => Some(as_resource(Some(value), "graph")?),
        None => None,
    };
    Ok(Triple::new(subject, predicate, object, context))
}

fn as_resource(value: Option<Value>, position: &str) -> Result<Resource> {
    match value {
        Some(Value::Iri(iri)) => Ok(Resource::Iri(iri)),
        Some(Value::Blank(label)) => Ok(Resource::Blank(label)),
        other => Err(Error::Query(format!("unexpected {} {:?}", position, other))),
    }
}
