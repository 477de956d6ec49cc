//! SPARQL 1.1 protocol client for remote stores (Apache Jena Fuseki, Oxigraph server)

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};

use super::results::{parse_ask, parse_select};
use super::{join_updates, Binding, RemoteStore, TransactionHandle, TransactionTable, UpdateExecutor};
use crate::config::{StoreEndpoint, StoreFlavor};
use crate::error::{Error, Result};

const SPARQL_RESULTS_JSON: &str = "application/sparql-results+json";

/// HTTP-backed store.
///
/// The plain SPARQL protocol has no transactions, so updates issued inside a
/// transaction are staged client-side and sent as one update request on
/// commit. Reads inside a transaction see only committed server state.
pub struct HttpStore {
    endpoint: StoreEndpoint,
    client: Client,
    transactions: TransactionTable<Vec<String>>,
}

impl HttpStore {
    pub fn new(endpoint: StoreEndpoint) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(endpoint.timeout_secs))
            .build()?;

        Ok(Self {
            endpoint,
            client,
            transactions: TransactionTable::new(),
        })
    }

    async fn post_query(&self, query: &str) -> Result<String> {
        let request = self.add_auth_header(self.client.post(self.endpoint.query_url()));
        let response = request
            .header("Accept", SPARQL_RESULTS_JSON)
            .form(&[("query", query)])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Error::Backend(format!(
                "Query failed with status {}: {}",
                status, error_body
            )));
        }

        Ok(response.text().await?)
    }

    async fn post_update(&self, update: &str) -> Result<()> {
        let request = self.add_auth_header(self.client.post(self.endpoint.update_url()));
        let response = match self.endpoint.flavor {
            StoreFlavor::Jena => request.form(&[("update", update)]).send().await?,
            StoreFlavor::Oxigraph => {
                request
                    .header("Content-Type", "application/sparql-update")
                    .body(update.to_string())
                    .send()
                    .await?
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Error::Backend(format!(
                "Update failed with status {}: {}",
                status, error_body
            )));
        }

        Ok(())
    }

    fn add_auth_header(&self, request: RequestBuilder) -> RequestBuilder {
        if let Some(token) = &self.endpoint.auth_token {
            request.header("Authorization", format!("Bearer {}", token))
        } else {
            request
        }
    }
}

#[async_trait]
impl UpdateExecutor for HttpStore {
    fn name(&self) -> &'static str {
        match self.endpoint.flavor {
            StoreFlavor::Jena => "jena",
            StoreFlavor::Oxigraph => "oxigraph-http",
        }
    }

    async fn submit(&self, update: &str, transaction: Option<&TransactionHandle>) -> Result<()> {
        match transaction {
            Some(handle) => self.transactions.with(handle, |staged| {
                staged.push(update.to_string());
                Ok(())
            }),
            None => self.post_update(update).await,
        }
    }
}

#[async_trait]
impl RemoteStore for HttpStore {
    async fn begin(&self) -> Result<TransactionHandle> {
        self.transactions.open(Vec::new())
    }

    /// Posts the staged updates as one request. The transaction is only
    /// closed once the server accepts them, so a failed commit can be retried.
    async fn commit(&self, transaction: &TransactionHandle) -> Result<()> {
        let staged = self.transactions.with(transaction, |staged| Ok(staged.clone()))?;
        if !staged.is_empty() {
            tracing::debug!(
                transaction = transaction.id(),
                updates = staged.len(),
                "Committing staged updates"
            );
            self.post_update(&join_updates(&staged)).await?;
        }
        self.transactions.take(transaction).map(|_| ())
    }

    async fn rollback(&self, transaction: &TransactionHandle) -> Result<()> {
        let staged = self.transactions.take(transaction)?;
        tracing::debug!(
            transaction = transaction.id(),
            discarded = staged.len(),
            "Rolled back staged updates"
        );
        Ok(())
    }

    async fn select(
        &self,
        query: &str,
        _transaction: Option<&TransactionHandle>,
    ) -> Result<Vec<Binding>> {
        parse_select(&self.post_query(query).await?)
    }

    async fn ask(&self, query: &str, _transaction: Option<&TransactionHandle>) -> Result<bool> {
        parse_ask(&self.post_query(query).await?)
    }
}
