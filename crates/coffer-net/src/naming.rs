//! Naming/discovery client.
//!
//! Maps the replica node names (`primary`, `backup`) to URIs through four
//! atomic single-record operations: `lookup`, `bind`, `unbind`, `rebind`.
//! Backed by either an HTTP registry or an in-process map for tests and
//! single-process deployments.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::NetError;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NamingRecord {
    uri: String,
}

/// A handle to the naming service.
#[derive(Clone)]
pub enum Naming {
    Http(HttpNaming),
    Memory(MemoryNaming),
}

impl Naming {
    /// Resolve a node name to its bound URI.
    pub async fn lookup(&self, node: &str) -> Result<String, NetError> {
        match self {
            Naming::Http(n) => n.lookup(node).await,
            Naming::Memory(n) => n.lookup(node).await,
        }
    }

    /// Bind a node name to a URI. Fails if the node is already bound.
    pub async fn bind(&self, node: &str, uri: &str) -> Result<(), NetError> {
        match self {
            Naming::Http(n) => n.bind(node, uri).await,
            Naming::Memory(n) => n.bind(node, uri).await,
        }
    }

    /// Remove a node's binding. The URI must match the current record.
    pub async fn unbind(&self, node: &str, uri: &str) -> Result<(), NetError> {
        match self {
            Naming::Http(n) => n.unbind(node, uri).await,
            Naming::Memory(n) => n.unbind(node, uri).await,
        }
    }

    /// Bind a node name to a URI, replacing any existing record.
    pub async fn rebind(&self, node: &str, uri: &str) -> Result<(), NetError> {
        match self {
            Naming::Http(n) => n.rebind(node, uri).await,
            Naming::Memory(n) => n.rebind(node, uri).await,
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP registry backend
// ---------------------------------------------------------------------------

/// Thin client for an HTTP naming registry exposing
/// `GET/POST/PUT/DELETE {base}/records/{node}`.
#[derive(Clone)]
pub struct HttpNaming {
    base_url: String,
    http: reqwest::Client,
}

impl HttpNaming {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn record_url(&self, node: &str) -> String {
        format!("{}/records/{}", self.base_url, node)
    }

    async fn lookup(&self, node: &str) -> Result<String, NetError> {
        let resp = self
            .http
            .get(self.record_url(node))
            .send()
            .await
            .map_err(|e| NetError::Naming(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(NetError::Naming(format!("node '{node}' is not bound")));
        }
        let record: NamingRecord = resp
            .error_for_status()
            .map_err(|e| NetError::Naming(e.to_string()))?
            .json()
            .await
            .map_err(|e| NetError::Naming(e.to_string()))?;
        Ok(record.uri)
    }

    async fn bind(&self, node: &str, uri: &str) -> Result<(), NetError> {
        self.http
            .post(self.record_url(node))
            .json(&NamingRecord {
                uri: uri.to_string(),
            })
            .send()
            .await
            .map_err(|e| NetError::Naming(e.to_string()))?
            .error_for_status()
            .map_err(|e| NetError::Naming(e.to_string()))?;
        Ok(())
    }

    async fn unbind(&self, node: &str, uri: &str) -> Result<(), NetError> {
        self.http
            .delete(self.record_url(node))
            .query(&[("uri", uri)])
            .send()
            .await
            .map_err(|e| NetError::Naming(e.to_string()))?
            .error_for_status()
            .map_err(|e| NetError::Naming(e.to_string()))?;
        Ok(())
    }

    async fn rebind(&self, node: &str, uri: &str) -> Result<(), NetError> {
        self.http
            .put(self.record_url(node))
            .json(&NamingRecord {
                uri: uri.to_string(),
            })
            .send()
            .await
            .map_err(|e| NetError::Naming(e.to_string()))?
            .error_for_status()
            .map_err(|e| NetError::Naming(e.to_string()))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-process backend
// ---------------------------------------------------------------------------

/// Shared in-memory record map with the same bind/unbind/rebind semantics.
#[derive(Clone, Default)]
pub struct MemoryNaming {
    records: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryNaming {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lookup(&self, node: &str) -> Result<String, NetError> {
        self.records
            .lock()
            .await
            .get(node)
            .cloned()
            .ok_or_else(|| NetError::Naming(format!("node '{node}' is not bound")))
    }

    async fn bind(&self, node: &str, uri: &str) -> Result<(), NetError> {
        let mut records = self.records.lock().await;
        if records.contains_key(node) {
            return Err(NetError::Naming(format!("node '{node}' is already bound")));
        }
        records.insert(node.to_string(), uri.to_string());
        Ok(())
    }

    async fn unbind(&self, node: &str, uri: &str) -> Result<(), NetError> {
        let mut records = self.records.lock().await;
        match records.get(node) {
            Some(bound) if bound == uri => {
                records.remove(node);
                Ok(())
            }
            Some(_) => Err(NetError::Naming(format!(
                "node '{node}' is bound to a different uri"
            ))),
            None => Err(NetError::Naming(format!("node '{node}' is not bound"))),
        }
    }

    async fn rebind(&self, node: &str, uri: &str) -> Result<(), NetError> {
        self.records
            .lock()
            .await
            .insert(node.to_string(), uri.to_string());
        Ok(())
    }
}
