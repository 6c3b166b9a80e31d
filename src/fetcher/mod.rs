//! Retrieval of per-token metadata documents from the remote content store.
//!
//! `HttpMetadataSource` talks to the IPFS gateway; `MetadataFetcher` drives
//! one batch at a time with a bounded number of requests in flight and
//! validates every document into a [`TokenMetadata`] before handing the
//! batch back for persistence.

use crate::collection_store::{TokenMetadata, TRAIT_DIMENSIONS, TRAIT_DIMENSION_COUNT};
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request for token {token} failed: {source}")]
    Http {
        token: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("request for token {token} returned status {status}")]
    Status {
        token: u32,
        status: reqwest::StatusCode,
    },

    /// The document decoded but its trait names do not exactly match the
    /// fixed dimension set, or the body was not a valid metadata document
    /// at all.
    #[error("token {token} has an invalid metadata document: {reason}")]
    InvalidDocument { token: u32, reason: String },
}

impl FetchError {
    /// The token whose retrieval or validation failed.
    pub fn token(&self) -> u32 {
        match self {
            FetchError::Http { token, .. } => *token,
            FetchError::Status { token, .. } => *token,
            FetchError::InvalidDocument { token, .. } => *token,
        }
    }
}

/// Raw per-token metadata document as served by the content store.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenDocument {
    pub attributes: Vec<TraitAttribute>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TraitAttribute {
    pub trait_type: String,
    pub value: String,
}

/// Build a validated record from a raw document. Trait names are matched
/// case-insensitively; the resulting set must be exactly the fixed
/// dimension set.
pub fn parse_document(token: u32, doc: &TokenDocument) -> Result<TokenMetadata, FetchError> {
    let invalid = |reason: String| FetchError::InvalidDocument { token, reason };

    let mut values: [Option<String>; TRAIT_DIMENSION_COUNT] = Default::default();
    for attribute in &doc.attributes {
        let name = attribute.trait_type.to_lowercase();
        match TRAIT_DIMENSIONS.iter().position(|d| *d == name) {
            Some(dimension) => {
                if values[dimension].replace(attribute.value.clone()).is_some() {
                    return Err(invalid(format!("duplicate trait {:?}", name)));
                }
            }
            None => return Err(invalid(format!("unknown trait {:?}", name))),
        }
    }

    let mut traits: [String; TRAIT_DIMENSION_COUNT] = Default::default();
    for (dimension, value) in values.into_iter().enumerate() {
        traits[dimension] = value.ok_or_else(|| {
            invalid(format!("missing trait {:?}", TRAIT_DIMENSIONS[dimension]))
        })?;
    }

    Ok(TokenMetadata::new(token, traits))
}

/// Source of raw metadata documents, one per token.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn fetch(&self, token: u32) -> Result<TokenDocument, FetchError>;
}

/// Fetches documents from `{base_url}/{token}`.
pub struct HttpMetadataSource {
    client: Client,
    base_url: String,
}

impl HttpMetadataSource {
    pub fn new(base_url: String, timeout_secs: u64) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl MetadataSource for HttpMetadataSource {
    async fn fetch(&self, token: u32) -> Result<TokenDocument, FetchError> {
        let url = format!("{}/{}", self.base_url, token);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| FetchError::Http { token, source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status { token, status });
        }

        response
            .json::<TokenDocument>()
            .await
            .map_err(|e| FetchError::InvalidDocument {
                token,
                reason: e.to_string(),
            })
    }
}

/// Concurrency-throttled batch retrieval.
///
/// At most `concurrency` requests are in flight at once, regardless of batch
/// size. A batch either completes as a whole or fails on the first error;
/// pending requests of a failed batch are dropped.
pub struct MetadataFetcher<S: MetadataSource> {
    source: Arc<S>,
    concurrency: usize,
}

impl<S: MetadataSource> MetadataFetcher<S> {
    pub fn new(source: S, concurrency: usize) -> Self {
        Self {
            source: Arc::new(source),
            concurrency: concurrency.max(1),
        }
    }

    /// Fetch and validate every token of one batch. Completion order within
    /// the batch is unspecified; the returned records are sorted by token.
    pub async fn fetch_batch(&self, tokens: &[u32]) -> Result<Vec<TokenMetadata>, FetchError> {
        let mut records: Vec<TokenMetadata> = stream::iter(tokens.iter().copied().map(|token| {
            let source = Arc::clone(&self.source);
            async move {
                let doc = source.fetch(token).await?;
                parse_document(token, &doc)
            }
        }))
        .buffer_unordered(self.concurrency)
        .try_collect()
        .await?;

        records.sort_unstable_by_key(|r| r.token());
        Ok(records)
    }
}
