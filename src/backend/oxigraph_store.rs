//! In-process store backed by Oxigraph, useful for embedding and for tests.

use async_trait::async_trait;
use oxigraph::model::{GraphName, NamedOrBlankNode, Quad, Term};
use oxigraph::sparql::{QueryResults, SparqlEvaluator};
use oxigraph::store::Store;

use super::{join_updates, Binding, RemoteStore, TransactionHandle, TransactionTable, UpdateExecutor};
use crate::core::{Literal, Resource, Triple, Value};
use crate::error::{Error, Result};

/// Private copy of the store a transaction reads from and writes into.
struct Workspace {
    store: Store,
    staged: Vec<String>,
}

/// Oxigraph embedded backend.
///
/// A transaction works on a snapshot copy of the store so that it can read
/// its own writes; on commit its updates are replayed against the shared
/// store as a single update.
pub struct OxigraphStore {
    store: Store,
    transactions: TransactionTable<Workspace>,
}

impl OxigraphStore {
    pub fn in_memory() -> Result<Self> {
        let store = Store::new()?;
        tracing::debug!("Created in-memory Oxigraph store");
        Ok(Self {
            store,
            transactions: TransactionTable::new(),
        })
    }

    /// Direct access to the committed store
    pub fn store(&self) -> &Store {
        &self.store
    }

    fn target(&self, transaction: Option<&TransactionHandle>) -> Result<Store> {
        match transaction {
            Some(handle) => self.transactions.with(handle, |ws| Ok(ws.store.clone())),
            None => Ok(self.store.clone()),
        }
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Backend(format!("Task join error: {}", e)))?
}

fn execute_update(store: &Store, update: &str) -> Result<()> {
    SparqlEvaluator::new()
        .parse_update(update)
        .map_err(|e| Error::Query(format!("Failed to parse SPARQL UPDATE: {}", e)))?
        .on_store(store)
        .execute()
        .map_err(|e| Error::Backend(format!("SPARQL UPDATE failed: {}", e)))
}

/// Converts a parsed quad. Returns `None` for quoted-triple objects.
pub fn triple_from_quad(quad: &Quad) -> Option<Triple> {
    let subject = match &quad.subject {
        NamedOrBlankNode::NamedNode(node) => Resource::iri(node.as_str()),
        NamedOrBlankNode::BlankNode(node) => Resource::blank(node.as_str()),
    };
    let context = match &quad.graph_name {
        GraphName::NamedNode(node) => Some(Resource::iri(node.as_str())),
        GraphName::BlankNode(node) => Some(Resource::blank(node.as_str())),
        GraphName::DefaultGraph => None,
    };
    let object = term_to_value(&quad.object)?;
    Some(Triple::new(subject, quad.predicate.as_str(), object, context))
}

fn term_to_value(term: &Term) -> Option<Value> {
    match term {
        Term::NamedNode(node) => Some(Value::Iri(node.as_str().to_string())),
        Term::BlankNode(node) => Some(Value::Blank(node.as_str().to_string())),
        Term::Literal(literal) => Some(Value::Literal(match literal.language() {
            Some(language) => Literal::language_tagged(literal.value(), language),
            None => Literal::typed(literal.value(), literal.datatype().as_str()),
        })),
        #[allow(unreachable_patterns)]
        _ => None,
    }
}

#[async_trait]
impl UpdateExecutor for OxigraphStore {
    fn name(&self) -> &'static str {
        "oxigraph"
    }

    async fn submit(&self, update: &str, transaction: Option<&TransactionHandle>) -> Result<()> {
        let store = self.target(transaction)?;
        let owned = update.to_string();
        blocking(move || execute_update(&store, &owned)).await?;

        if let Some(handle) = transaction {
            self.transactions.with(handle, |ws| {
                ws.staged.push(update.to_string());
                Ok(())
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for OxigraphStore {
    async fn begin(&self) -> Result<TransactionHandle> {
        let committed = self.store.clone();
        let snapshot = blocking(move || {
            let workspace = Store::new()?;
            for quad in committed.iter() {
                workspace.insert(&quad?)?;
            }
            Ok(workspace)
        })
        .await?;

        self.transactions.open(Workspace { store: snapshot, staged: Vec::new() })
    }

    async fn commit(&self, transaction: &TransactionHandle) -> Result<()> {
        let staged = self.transactions.with(transaction, |ws| Ok(ws.staged.clone()))?;
        if !staged.is_empty() {
            let store = self.store.clone();
            let update = join_updates(&staged);
            blocking(move || execute_update(&store, &update)).await?;
        }
        self.transactions.take(transaction).map(|_| ())
    }

    async fn rollback(&self, transaction: &TransactionHandle) -> Result<()> {
        self.transactions.take(transaction).map(|_| ())
    }

    async fn select(
        &self,
        query: &str,
        transaction: Option<&TransactionHandle>,
    ) -> Result<Vec<Binding>> {
        let prepared = SparqlEvaluator::new()
            .parse_query(query)
            .map_err(|e| Error::Query(format!("Failed to parse SPARQL SELECT: {}", e)))?;
        let store = self.target(transaction)?;

        blocking(move || {
            let results = prepared
                .on_store(&store)
                .execute()
                .map_err(|e| Error::Query(format!("SPARQL SELECT failed: {}", e)))?;

            let QueryResults::Solutions(solutions) = results else {
                return Err(Error::Query("Expected SELECT to return solutions".to_string()));
            };

            let mut bindings = Vec::new();
            for solution in solutions {
                let solution =
                    solution.map_err(|e| Error::Query(format!("Failed to read solution: {}", e)))?;
                let mut binding = Binding::new();
                for (var, term) in solution.iter() {
                    if let Some(value) = term_to_value(term) {
                        binding.insert(var.as_str().to_string(), value);
                    }
                }
                bindings.push(binding);
            }
            Ok(bindings)
        })
        .await
    }

    async fn ask(&self, query: &str, transaction: Option<&TransactionHandle>) -> Result<bool> {
        let prepared = SparqlEvaluator::new()
            .parse_query(query)
            .map_err(|e| Error::Query(format!("Failed to parse SPARQL ASK: {}", e)))?;
        let store = self.target(transaction)?;

        blocking(move || {
            match prepared
                .on_store(&store)
                .execute()
                .map_err(|e| Error::Query(format!("SPARQL ASK failed: {}", e)))?
            {
                QueryResults::Boolean(value) => Ok(value),
                _ => Err(Error::Query("Expected ASK to return boolean result".to_string())),
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INSERT: &str = "INSERT DATA { <http://example.org/s> <http://example.org/p> \"v\"@en }";
    const ASK: &str = "ASK { <http://example.org/s> <http://example.org/p> ?o }";

    #[tokio::test]
    async fn test_submit_and_select() {
        let store = OxigraphStore::in_memory().unwrap();
        store.submit(INSERT, None).await.unwrap();

        let bindings = store.select("SELECT ?o WHERE { ?s ?p ?o }", None).await.unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0]["o"], Value::Literal(Literal::language_tagged("v", "en")));
    }

    #[tokio::test]
    async fn test_malformed_update_is_rejected() {
        let store = OxigraphStore::in_memory().unwrap();
        assert!(matches!(store.submit("INSERT DATA {", None).await, Err(Error::Query(_))));
    }

    #[tokio::test]
    async fn test_transaction_isolation() {
        let store = OxigraphStore::in_memory().unwrap();
        let txn = store.begin().await.unwrap();
        store.submit(INSERT, Some(&txn)).await.unwrap();

        assert!(store.ask(ASK, Some(&txn)).await.unwrap());
        assert!(!store.ask(ASK, None).await.unwrap());

        store.commit(&txn).await.unwrap();
        assert!(store.ask(ASK, None).await.unwrap());
    }

    #[test]
    fn test_triple_from_quad() {
        use oxigraph::model::{BlankNode, NamedNode};

        let quad = Quad::new(
            BlankNode::new("b0").unwrap(),
            NamedNode::new("http://example.org/p").unwrap(),
            oxigraph::model::Literal::new_simple_literal("v"),
            NamedNode::new("http://example.org/g").unwrap(),
        );
        let triple = triple_from_quad(&quad).unwrap();
        assert_eq!(triple.subject, Resource::blank("b0"));
        assert_eq!(triple.object, Value::Literal(Literal::simple("v")));
        assert_eq!(triple.context, Some(Resource::iri("http://example.org/g")));
    }

    #[tokio::test]
    async fn test_rollback_discards() {
        let store = OxigraphStore::in_memory().unwrap();
        let txn = store.begin().await.unwrap();
        store.submit(INSERT, Some(&txn)).await.unwrap();
        store.rollback(&txn).await.unwrap();

        assert!(!store.ask(ASK, None).await.unwrap());
        assert!(store.commit(&txn).await.is_err());
    }
}
