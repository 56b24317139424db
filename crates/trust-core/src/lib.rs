#![forbid(unsafe_code)]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::float_cmp)]
#![deny(clippy::cast_precision_loss)]
#![deny(clippy::cast_possible_truncation)]
#![deny(clippy::cast_possible_wrap)]
#![deny(clippy::cast_sign_loss)]
#![deny(clippy::disallowed_types)]

//! Core types for the token-trust registry indexer.
//!
//! A trust contract holds one output per registration. Each output carries a
//! single registration token and an inline datum naming a subject, the signer
//! vouching for it and optional CIP-68 metadata. This crate decodes those
//! datums, filters outputs down to valid registrations and derives the two
//! published indices (by subject, by signer).
//!
//! Nothing here performs I/O.

pub mod cip68;
pub mod index;
pub mod plutus;
pub mod schema;
pub mod utxo;
pub mod validation;

pub use cip68::Cip68Datum;
pub use index::{
    build_indices, render, Indices, RenderError, SignatureRecord, SignedSubject, SignerEntry,
    SubjectEntry,
};
pub use plutus::{DatumError, PlutusData, MAX_DATUM_BYTES, MAX_DEPTH};
pub use schema::{Registration, TRUSTED_TOKEN_NAME};
pub use utxo::{AssetName, DatumOption, IdError, PolicyId, Utxo, UtxoRef, Value};
pub use validation::{
    validate, validate_all, RejectionReason, TokenSelector, ValidatedRegistration,
    ValidationReport,
};
