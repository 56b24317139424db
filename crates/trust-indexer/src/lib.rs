#![forbid(unsafe_code)]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::float_cmp)]
#![deny(clippy::cast_precision_loss)]
#![deny(clippy::cast_possible_truncation)]
#![deny(clippy::cast_possible_wrap)]
#![deny(clippy::cast_sign_loss)]
#![deny(clippy::disallowed_types)]

//! Trust registry indexer.
//!
//! One supervised worker per tracked contract pulls the contract's UTxO set,
//! keeps the valid registrations and atomically republishes the `subjects` and
//! `signers` documents. Workers share nothing but the document directory, and
//! each writes only its own two files.

pub mod metrics;
pub mod poller;
pub mod source;
pub mod store;
pub mod supervisor;

pub use poller::{ContractPoller, ContractSpec, CycleError, CycleReport, Phase, WorkerSnapshot};
pub use source::{KupoUtxoSource, SourceError, StaticUtxoSource, UtxoSource};
pub use store::{is_safe_name, publish_atomic, DocumentStore, PublishError, Purpose};
pub use supervisor::{spawn_supervised, spawn_supervised_with, PollerHandle, SupervisorConfig};
