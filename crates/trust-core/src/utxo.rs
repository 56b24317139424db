//! Unspent outputs as delivered by a chain source.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier parse errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),
    #[error("expected {expected} bytes, found {actual}")]
    WrongLength { expected: usize, actual: usize },
    #[error("invalid output reference `{0}`, expected <txid>#<index>")]
    InvalidRef(String),
}

/// 28-byte minting policy hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolicyId(pub [u8; 28]);

impl PolicyId {
    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, IdError> {
        let bytes = hex::decode(hex_str).map_err(|e| IdError::InvalidHex(e.to_string()))?;
        let actual = bytes.len();
        let array: [u8; 28] = bytes
            .try_into()
            .map_err(|_| IdError::WrongLength { expected: 28, actual })?;
        Ok(Self(array))
    }
}

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Asset name bytes (at most 32 on chain).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct AssetName(pub Vec<u8>);

impl AssetName {
    pub const MAX_LEN: usize = 32;

    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, IdError> {
        let bytes = bytes.into();
        if bytes.len() > Self::MAX_LEN {
            return Err(IdError::WrongLength {
                expected: Self::MAX_LEN,
                actual: bytes.len(),
            });
        }
        Ok(Self(bytes))
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, IdError> {
        Self::new(hex::decode(hex_str).map_err(|e| IdError::InvalidHex(e.to_string()))?)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

/// Output reference, rendered as `<txid>#<index>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UtxoRef {
    pub transaction_id: String,
    pub output_index: u32,
}

impl UtxoRef {
    pub fn new(transaction_id: impl Into<String>, output_index: u32) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            output_index,
        }
    }
}

impl fmt::Display for UtxoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.transaction_id, self.output_index)
    }
}

impl std::str::FromStr for UtxoRef {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tx, idx) = s
            .split_once('#')
            .ok_or_else(|| IdError::InvalidRef(s.to_string()))?;
        let output_index = idx
            .parse()
            .map_err(|_| IdError::InvalidRef(s.to_string()))?;
        if tx.is_empty() || hex::decode(tx).is_err() {
            return Err(IdError::InvalidRef(s.to_string()));
        }
        Ok(Self::new(tx, output_index))
    }
}

/// Lovelace plus native assets held by an output.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Value {
    pub coins: u64,
    pub assets: BTreeMap<PolicyId, BTreeMap<AssetName, u64>>,
}

impl Value {
    pub fn lovelace(coins: u64) -> Self {
        Self {
            coins,
            assets: BTreeMap::new(),
        }
    }

    pub fn with_asset(mut self, policy_id: PolicyId, asset_name: AssetName, quantity: u64) -> Self {
        self.add_asset(policy_id, asset_name, quantity);
        self
    }

    pub fn add_asset(&mut self, policy_id: PolicyId, asset_name: AssetName, quantity: u64) {
        let slot = self
            .assets
            .entry(policy_id)
            .or_default()
            .entry(asset_name)
            .or_insert(0);
        *slot = slot.saturating_add(quantity);
    }

    /// Quantity of one asset class; zero when absent.
    pub fn quantity_of(&self, policy_id: &PolicyId, asset_name: &AssetName) -> u64 {
        self.assets
            .get(policy_id)
            .and_then(|names| names.get(asset_name))
            .copied()
            .unwrap_or(0)
    }
}

/// Datum attached to an output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatumOption {
    /// Raw CBOR of an inline datum (or a hash datum the source resolved).
    Inline(Vec<u8>),
    /// Datum hash (hex) whose body was not available.
    Hash(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub reference: UtxoRef,
    pub address: String,
    pub value: Value,
    pub datum: Option<DatumOption>,
}
