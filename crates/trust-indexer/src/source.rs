//! Where a poller gets its UTxO snapshot from.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use kupo_rpc::{DatumType, KupoClient, KupoConfig, KupoError, Match, MatchValue};
use thiserror::Error;
use tracing::debug;
use trust_core::{AssetName, DatumOption, PolicyId, Utxo, UtxoRef, Value};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("network error: {0}")]
    Network(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<KupoError> for SourceError {
    fn from(err: KupoError) -> Self {
        match err {
            KupoError::Network(msg) => SourceError::Network(msg),
            KupoError::Decode(msg) => SourceError::Decode(msg),
            other @ (KupoError::HttpStatus { .. } | KupoError::Config(_)) => {
                SourceError::Protocol(other.to_string())
            }
        }
    }
}

/// Read-only view of the unspent outputs sitting at an address.
#[async_trait]
pub trait UtxoSource: Send + Sync {
    async fn utxos(&self, address: &str) -> Result<Vec<Utxo>, SourceError>;
}

/// [`UtxoSource`] backed by a Kupo instance.
pub struct KupoUtxoSource {
    client: KupoClient,
}

impl KupoUtxoSource {
    pub fn new(client: KupoClient) -> Self {
        Self { client }
    }

    pub fn from_config(cfg: KupoConfig) -> Result<Self, SourceError> {
        Ok(Self::new(KupoClient::new(cfg)?))
    }
}

#[async_trait]
impl UtxoSource for KupoUtxoSource {
    async fn utxos(&self, address: &str) -> Result<Vec<Utxo>, SourceError> {
        let matches = self.client.matches_unspent(address).await?;
        debug!(address, matches = matches.len(), base_url = self.client.base_url(), "fetched matches");

        let mut datums: HashMap<String, Option<Vec<u8>>> = HashMap::new();
        let mut out = Vec::with_capacity(matches.len());
        for m in matches {
            let datum = match (&m.datum_hash, m.datum_type) {
                (None, _) => None,
                (Some(hash), Some(DatumType::Inline)) => {
                    if !datums.contains_key(hash) {
                        let body = self.fetch_datum(hash).await?;
                        datums.insert(hash.clone(), body);
                    }
                    match datums.get(hash).cloned().flatten() {
                        Some(raw) => Some(DatumOption::Inline(raw)),
                        None => Some(DatumOption::Hash(hash.clone())),
                    }
                }
                (Some(hash), _) => Some(DatumOption::Hash(hash.clone())),
            };
            out.push(utxo_from_match(m, datum)?);
        }
        Ok(out)
    }
}

impl KupoUtxoSource {
    async fn fetch_datum(&self, hash: &str) -> Result<Option<Vec<u8>>, SourceError> {
        match self.client.datum(hash).await? {
            Some(resp) => hex::decode(&resp.datum)
                .map(Some)
                .map_err(|e| SourceError::Decode(format!("datum {hash}: {e}"))),
            None => Ok(None),
        }
    }
}

fn utxo_from_match(m: Match, datum: Option<DatumOption>) -> Result<Utxo, SourceError> {
    Ok(Utxo {
        reference: UtxoRef::new(m.transaction_id, m.output_index),
        address: m.address,
        value: value_from_match(&m.value)?,
        datum,
    })
}

/// Kupo keys assets as `policy` (empty name) or `policy.name`, both hex.
fn value_from_match(value: &MatchValue) -> Result<Value, SourceError> {
    let mut out = Value::lovelace(value.coins);
    for (key, quantity) in &value.assets {
        let (policy, name) = key.split_once('.').unwrap_or((key.as_str(), ""));
        let policy = PolicyId::from_hex(policy)
            .map_err(|e| SourceError::Decode(format!("asset `{key}`: {e}")))?;
        let name = AssetName::from_hex(name)
            .map_err(|e| SourceError::Decode(format!("asset `{key}`: {e}")))?;
        out.add_asset(policy, name, *quantity);
    }
    Ok(out)
}

/// In-memory source with per-address snapshots and injectable failures.
#[derive(Default)]
pub struct StaticUtxoSource {
    snapshots: Mutex<HashMap<String, Result<Vec<Utxo>, SourceError>>>,
    calls: AtomicU64,
}

impl StaticUtxoSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_utxos(&self, address: impl Into<String>, utxos: Vec<Utxo>) {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address.into(), Ok(utxos));
    }

    /// Every later fetch of `address` fails with `error`.
    pub fn fail(&self, address: impl Into<String>, error: SourceError) {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address.into(), Err(error));
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl UtxoSource for StaticUtxoSource {
    async fn utxos(&self, address: &str) -> Result<Vec<Utxo>, SourceError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let snapshots = self.snapshots.lock().unwrap_or_else(PoisonError::into_inner);
        match snapshots.get(address) {
            Some(snapshot) => snapshot.clone(),
            None => Ok(Vec::new()),
        }
    }
}
