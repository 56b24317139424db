//! Derived indices over one snapshot of accepted registrations.
//!
//! `subjects`: `[{"subject":<data>,"verifiers":[<signature>..]}..]`
//! `signers`:  `[{"signer":"<hex>","subjects":[{"subject":<data>,"signature":<signature>}..]}..]`
//!
//! Groups keep first-seen order. The signers index is derived from the subjects
//! index of the same build, so every (subject, signer) pair appears in both.

use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::cip68::Cip68Datum;
use crate::plutus::PlutusData;
use crate::utxo::UtxoRef;
use crate::validation::ValidatedRegistration;

/// One signer's claim about a subject, backed by one output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRecord {
    pub signer: Vec<u8>,
    pub utxo: UtxoRef,
    pub metadata: Option<Cip68Datum>,
}

impl Serialize for SignatureRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("signer", &hex::encode(&self.signer))?;
        map.serialize_entry("utxo", &self.utxo.to_string())?;
        match &self.metadata {
            Some(datum) => {
                map.serialize_entry("metadata", &datum.metadata)?;
                map.serialize_entry("version", &datum.version)?;
                map.serialize_entry("extra", &datum.extra)?;
            }
            // Explicit null: absent metadata is not the same as an empty map.
            None => map.serialize_entry("metadata", &())?,
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectEntry {
    pub subject: PlutusData,
    pub verifiers: Vec<SignatureRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedSubject {
    pub subject: PlutusData,
    pub signature: SignatureRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignerEntry {
    pub signer: String,
    pub subjects: Vec<SignedSubject>,
}

/// Both documents of one build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Indices {
    pub subjects: Vec<SubjectEntry>,
    pub signers: Vec<SignerEntry>,
}

impl Indices {
    /// Total number of signature records (equal in both documents).
    pub fn registrations(&self) -> usize {
        self.subjects.iter().map(|s| s.verifiers.len()).sum()
    }
}

pub fn build_indices(accepted: &[ValidatedRegistration]) -> Indices {
    let mut by_subject: IndexMap<&PlutusData, Vec<SignatureRecord>> = IndexMap::new();
    for item in accepted {
        by_subject
            .entry(&item.registration.subject)
            .or_default()
            .push(SignatureRecord {
                signer: item.registration.signer.clone(),
                utxo: item.reference.clone(),
                metadata: item.registration.metadata.clone(),
            });
    }

    let subjects: Vec<SubjectEntry> = by_subject
        .into_iter()
        .map(|(subject, verifiers)| SubjectEntry {
            subject: subject.clone(),
            verifiers,
        })
        .collect();

    let mut by_signer: IndexMap<String, Vec<SignedSubject>> = IndexMap::new();
    for entry in &subjects {
        for signature in &entry.verifiers {
            by_signer
                .entry(hex::encode(&signature.signer))
                .or_default()
                .push(SignedSubject {
                    subject: entry.subject.clone(),
                    signature: signature.clone(),
                });
        }
    }

    let signers = by_signer
        .into_iter()
        .map(|(signer, subjects)| SignerEntry { signer, subjects })
        .collect();

    Indices { subjects, signers }
}

#[derive(Debug, Error)]
#[error("failed to render document: {0}")]
pub struct RenderError(#[from] serde_json::Error);

/// Compact JSON (no whitespace between tokens).
pub fn render<T: Serialize + ?Sized>(document: &T) -> Result<String, RenderError> {
    Ok(serde_json::to_string(document)?)
}
