//! Registration filter: decides which outputs at a contract address count.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

use crate::plutus::DatumError;
use crate::schema::{Registration, TRUSTED_TOKEN_NAME};
use crate::utxo::{AssetName, DatumOption, PolicyId, Utxo, UtxoRef};

/// Asset class whose presence (exactly once) marks a registration output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSelector {
    pub policy_id: PolicyId,
    pub asset_name: AssetName,
}

impl TokenSelector {
    pub fn new(policy_id: PolicyId, asset_name: AssetName) -> Self {
        Self {
            policy_id,
            asset_name,
        }
    }

    /// Selector for the standard `trusted` registration token.
    pub fn trusted(policy_id: PolicyId) -> Self {
        Self::new(policy_id, AssetName(TRUSTED_TOKEN_NAME.to_vec()))
    }
}

/// Why an output was left out of the indices.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectionReason {
    #[error("expected exactly 1 registration token, found {found}")]
    MissingOrWrongTokenAmount { found: u64 },
    #[error("output carries no datum")]
    MissingDatum,
    #[error("datum {datum_hash} is only referenced by hash")]
    UnresolvedDatum { datum_hash: String },
    #[error("malformed datum: {0}")]
    MalformedDatum(#[from] DatumError),
}

impl RejectionReason {
    pub const ALL: [&'static str; 4] = [
        "missing_or_wrong_token_amount",
        "missing_datum",
        "unresolved_datum",
        "malformed_datum",
    ];

    /// Stable label used in logs and metrics.
    pub const fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::MissingOrWrongTokenAmount { .. } => "missing_or_wrong_token_amount",
            RejectionReason::MissingDatum => "missing_datum",
            RejectionReason::UnresolvedDatum { .. } => "unresolved_datum",
            RejectionReason::MalformedDatum(_) => "malformed_datum",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRegistration {
    pub reference: UtxoRef,
    pub registration: Registration,
}

/// Checks one output. Order: token amount, datum presence, datum shape.
pub fn validate(
    utxo: &Utxo,
    policy_id: &PolicyId,
    asset_name: &AssetName,
) -> Result<ValidatedRegistration, RejectionReason> {
    let found = utxo.value.quantity_of(policy_id, asset_name);
    if found != 1 {
        return Err(RejectionReason::MissingOrWrongTokenAmount { found });
    }

    let raw = match &utxo.datum {
        None => return Err(RejectionReason::MissingDatum),
        Some(DatumOption::Hash(hash)) => {
            return Err(RejectionReason::UnresolvedDatum {
                datum_hash: hash.clone(),
            })
        }
        Some(DatumOption::Inline(raw)) => raw,
    };

    let registration = Registration::from_cbor(raw)?;
    Ok(ValidatedRegistration {
        reference: utxo.reference.clone(),
        registration,
    })
}

/// Outcome of validating one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Accepted registrations in scan order.
    pub accepted: Vec<ValidatedRegistration>,
    pub rejected: BTreeMap<&'static str, usize>,
}

impl ValidationReport {
    pub fn rejected_total(&self) -> usize {
        self.rejected.values().sum()
    }
}

/// Runs [`validate`] over a whole snapshot. Never fails; rejects are counted.
pub fn validate_all<'a>(
    utxos: impl IntoIterator<Item = &'a Utxo>,
    selector: &TokenSelector,
) -> ValidationReport {
    let mut report = ValidationReport::default();
    for utxo in utxos {
        match validate(utxo, &selector.policy_id, &selector.asset_name) {
            Ok(accepted) => report.accepted.push(accepted),
            Err(reason) => {
                debug!(
                    utxo = %utxo.reference,
                    reason = reason.as_str(),
                    detail = %reason,
                    "output rejected"
                );
                *report.rejected.entry(reason.as_str()).or_insert(0) += 1;
            }
        }
    }
    report
}
