//! REST client for the indexer's paginated event streams.
//!
//! Every stream follows one pagination contract:
//! `GET {base}/{chain_id}/{stream}/{offset}/{limit}` returning a JSON array.
//! A page shorter than `limit` means the stream is exhausted. Network and
//! server failures surface as retryable `Error::Remote`; a body that decodes
//! but carries malformed field values is `Error::InvalidEncoding` and is
//! never retried.

use std::time::Duration;

use async_trait::async_trait;
use halo2curves_axiom::bn256::Fr;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::config::VaultConfig;
use crate::error::{Error, Result};
use crate::hash::fr_from_hex;
use crate::store::StreamKind;

/// One confirmed leaf insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafEvent {
    pub leaf_index: u64,
    pub leaf_value: Fr,
}

/// One published nullifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NullifierEvent {
    pub nullifier: Fr,
}

/// One encrypted note payload, addressed to an unknown recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadEvent {
    pub id: String,
    pub ciphertext: Vec<u8>,
}

/// Paginated access to the three indexer streams. The sync layer talks to
/// this trait so tests can script a feed.
#[async_trait]
pub trait IndexerApi: Send + Sync {
    async fn leaf_page(&self, offset: u64, limit: u32) -> Result<Vec<LeafEvent>>;
    async fn nullifier_page(&self, offset: u64, limit: u32) -> Result<Vec<NullifierEvent>>;
    async fn payload_page(&self, offset: u64, limit: u32) -> Result<Vec<PayloadEvent>>;
}

#[async_trait]
impl<T: IndexerApi + ?Sized> IndexerApi for std::sync::Arc<T> {
    async fn leaf_page(&self, offset: u64, limit: u32) -> Result<Vec<LeafEvent>> {
        self.as_ref().leaf_page(offset, limit).await
    }

    async fn nullifier_page(&self, offset: u64, limit: u32) -> Result<Vec<NullifierEvent>> {
        self.as_ref().nullifier_page(offset, limit).await
    }

    async fn payload_page(&self, offset: u64, limit: u32) -> Result<Vec<PayloadEvent>> {
        self.as_ref().payload_page(offset, limit).await
    }
}

#[derive(Debug, Deserialize)]
struct WireLeaf {
    #[allow(dead_code)]
    id: String,
    #[serde(rename = "leafIndex")]
    leaf_index: u64,
    #[serde(rename = "leafValue")]
    leaf_value: String,
}

#[derive(Debug, Deserialize)]
struct WireNullifier {
    #[allow(dead_code)]
    id: String,
    nullifier: String,
}

#[derive(Debug, Deserialize)]
struct WirePayload {
    id: String,
    #[serde(rename = "encryptedNote")]
    encrypted_note: String,
}

/// HTTP implementation of [`IndexerApi`].
pub struct HttpIndexerClient {
    client: reqwest::Client,
    base_url: String,
    chain_id: u64,
}

impl HttpIndexerClient {
    pub fn new(base_url: impl Into<String>, chain_id: u64, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to build http client: {e}")))?;
        Ok(HttpIndexerClient {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            chain_id,
        })
    }

    pub fn from_config(config: &VaultConfig) -> Result<Self> {
        HttpIndexerClient::new(
            config.indexer_url.clone(),
            config.network.chain_id,
            config.sync.request_timeout,
        )
    }

    fn stream_url(&self, stream: StreamKind, offset: u64, limit: u32) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.base_url,
            self.chain_id,
            stream.as_str(),
            offset,
            limit
        )
    }

    async fn fetch_page<T: DeserializeOwned>(
        &self,
        stream: StreamKind,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<T>> {
        let url = self.stream_url(stream, offset, limit);
        debug!(%url, "fetching indexer page");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Remote(format!("request to {url} failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Remote(format!(
                "indexer returned {} for {url}",
                response.status()
            )));
        }

        response
            .json::<Vec<T>>()
            .await
            .map_err(|e| Error::Remote(format!("invalid response body from {url}: {e}")))
    }
}

#[async_trait]
impl IndexerApi for HttpIndexerClient {
    async fn leaf_page(&self, offset: u64, limit: u32) -> Result<Vec<LeafEvent>> {
        let wire: Vec<WireLeaf> = self.fetch_page(StreamKind::Leaves, offset, limit).await?;
        wire.into_iter()
            .map(|event| {
                Ok(LeafEvent {
                    leaf_index: event.leaf_index,
                    leaf_value: fr_from_hex(&event.leaf_value)?,
                })
            })
            .collect()
    }

    async fn nullifier_page(&self, offset: u64, limit: u32) -> Result<Vec<NullifierEvent>> {
        let wire: Vec<WireNullifier> = self
            .fetch_page(StreamKind::Nullifiers, offset, limit)
            .await?;
        wire.into_iter()
            .map(|event| {
                Ok(NullifierEvent {
                    nullifier: fr_from_hex(&event.nullifier)?,
                })
            })
            .collect()
    }

    async fn payload_page(&self, offset: u64, limit: u32) -> Result<Vec<PayloadEvent>> {
        let wire: Vec<WirePayload> = self
            .fetch_page(StreamKind::Payloads, offset, limit)
            .await?;
        wire.into_iter()
            .map(|event| {
                let digits = event
                    .encrypted_note
                    .strip_prefix("0x")
                    .unwrap_or(&event.encrypted_note);
                let ciphertext = hex::decode(digits).map_err(|e| {
                    Error::InvalidEncoding(format!("payload {} is not hex: {e}", event.id))
                })?;
                Ok(PayloadEvent {
                    id: event.id,
                    ciphertext,
                })
            })
            .collect()
    }
}
