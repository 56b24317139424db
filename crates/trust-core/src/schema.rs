//! On-chain layout of a registration datum.
//!
//! ```text
//! Registration = Constr 0 [ subject  : Data
//!                         , signer   : ByteArray
//!                         , metadata : Cip68Datum | Nothing ]
//! Nothing      = Constr 0 []
//! ```
//!
//! Both the indexer and any tooling that builds registration transactions go
//! through this module, so the layout is defined once.

use crate::cip68::Cip68Datum;
use crate::plutus::{DatumError, PlutusData};

/// Name of the registration token minted under a trust contract's policy.
pub const TRUSTED_TOKEN_NAME: &[u8] = b"trusted";

pub const REGISTRATION_CONSTR: u64 = 0;
pub const NOTHING_CONSTR: u64 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub subject: PlutusData,
    pub signer: Vec<u8>,
    pub metadata: Option<Cip68Datum>,
}

impl Registration {
    pub fn from_plutus(data: &PlutusData) -> Result<Self, DatumError> {
        let fields = data.constr_fields(REGISTRATION_CONSTR, "registration")?;
        let [subject, signer, metadata] = fields else {
            return Err(DatumError::field(
                "registration",
                format!("expected 3 fields, found {}", fields.len()),
            ));
        };

        let signer = signer
            .as_bytes()
            .ok_or_else(|| {
                DatumError::field("signer", format!("expected bytes, found {}", signer.kind()))
            })?
            .to_vec();

        let metadata = match metadata {
            PlutusData::Constr { tag, fields } if *tag == NOTHING_CONSTR && fields.is_empty() => {
                None
            }
            other => Some(Cip68Datum::from_plutus(other).map_err(|e| e.within("metadata"))?),
        };

        Ok(Self {
            subject: subject.clone(),
            signer,
            metadata,
        })
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self, DatumError> {
        Self::from_plutus(&PlutusData::from_cbor(bytes)?)
    }

    pub fn to_plutus(&self) -> PlutusData {
        let metadata = match &self.metadata {
            Some(datum) => datum.to_plutus(),
            None => PlutusData::Constr {
                tag: NOTHING_CONSTR,
                fields: Vec::new(),
            },
        };
        PlutusData::Constr {
            tag: REGISTRATION_CONSTR,
            fields: vec![
                self.subject.clone(),
                PlutusData::Bytes(self.signer.clone()),
                metadata,
            ],
        }
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>, DatumError> {
        self.to_plutus().to_cbor()
    }

    pub fn signer_hex(&self) -> String {
        hex::encode(&self.signer)
    }
}
