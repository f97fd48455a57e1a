//! Specification include resolution
//!
//! A specification may pull in nested specifications by URL. All includes of
//! one document are fetched concurrently (fan-out), each recursively
//! resolving its own includes, and the results are merged in declaration
//! order regardless of completion order so the outcome is deterministic.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::future::join_all;

use crate::definition::SpecificationDoc;
use crate::error::{Result, SpecError};

/// Fetches an included specification by URL
#[async_trait]
pub trait IncludeFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<SpecificationDoc>;
}

/// Production fetcher backed by an HTTP client
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IncludeFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<SpecificationDoc> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SpecError::include_fetch(url, e.to_string()))?;
        let response = response
            .error_for_status()
            .map_err(|e| SpecError::include_fetch(url, e.to_string()))?;
        response
            .json::<SpecificationDoc>()
            .await
            .map_err(|e| SpecError::include_fetch(url, e.to_string()))
    }
}

/// Resolve every `include` of a specification, recursively, and merge the
/// results into the root document
///
/// Included documents contribute their nodes and graphs; the root document's
/// metadata always wins. A URL appearing more than once anywhere in the
/// include tree is fetched once and skipped afterwards, which also breaks
/// include cycles.
pub async fn resolve_includes(
    mut root: SpecificationDoc,
    fetcher: &dyn IncludeFetcher,
) -> Result<SpecificationDoc> {
    let visited = Mutex::new(HashSet::new());
    let merged = resolve_level(&mut root, fetcher, &visited).await?;
    for doc in merged {
        merge_into(&mut root, doc);
    }
    Ok(root)
}

/// Fetch one document's includes concurrently and flatten the subtree results
/// in declaration order
fn resolve_level<'a>(
    doc: &'a mut SpecificationDoc,
    fetcher: &'a dyn IncludeFetcher,
    visited: &'a Mutex<HashSet<String>>,
) -> Pin<Box<dyn Future<Output = Result<Vec<SpecificationDoc>>> + Send + 'a>> {
    Box::pin(async move {
        let urls: Vec<String> = {
            let mut seen = visited.lock().expect("include visited set poisoned");
            doc.include
                .iter()
                .filter(|url| seen.insert((*url).clone()))
                .cloned()
                .collect()
        };
        for skipped in doc.include.iter().filter(|u| !urls.iter().any(|v| v == *u)) {
            log::warn!("skipping already-included specification '{}'", skipped);
        }

        // Fan-out: fetch this level concurrently. join_all preserves input
        // order, which keeps the merge deterministic under any timing.
        let fetched = join_all(urls.iter().map(|url| fetcher.fetch(url))).await;

        let mut results = Vec::new();
        for outcome in fetched {
            let mut child = outcome?;
            let nested = resolve_level(&mut child, fetcher, visited).await?;
            results.push(child);
            results.extend(nested);
        }
        Ok(results)
    })
}

fn merge_into(root: &mut SpecificationDoc, other: SpecificationDoc) {
    root.nodes.extend(other.nodes);
    root.graphs.extend(other.graphs);
    root.include_graphs.extend(other.include_graphs);
}
