//! CIP-68 metadata datum: `Constr 0 [metadata map, version, extra]`.

use std::fmt;

use indexmap::IndexMap;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::plutus::{DatumError, PlutusData, MAX_DEPTH};

/// Constructor alternative of a CIP-68 datum.
pub const CIP68_CONSTR: u64 = 0;

/// Decoded CIP-68 datum.
///
/// Metadata keys are UTF-8 text on chain (byte strings) and keep their chain
/// order. The JSON form is `{"metadata":{..},"version":n,"extra":<data>}` with
/// metadata values and `extra` in tagged chain-data form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cip68Datum {
    #[serde(deserialize_with = "unique_metadata")]
    pub metadata: IndexMap<String, PlutusData>,
    pub version: i128,
    pub extra: PlutusData,
}

impl Cip68Datum {
    pub fn from_plutus(data: &PlutusData) -> Result<Self, DatumError> {
        let fields = data.constr_fields(CIP68_CONSTR, "cip68")?;
        let [metadata, version, extra] = fields else {
            return Err(DatumError::field(
                "cip68",
                format!("expected 3 fields, found {}", fields.len()),
            ));
        };

        let PlutusData::Map(entries) = metadata else {
            return Err(DatumError::field(
                "metadata",
                format!("expected a map, found {}", metadata.kind()),
            ));
        };
        let mut decoded = IndexMap::with_capacity(entries.len());
        for (key, value) in entries {
            let Some(raw) = key.as_bytes() else {
                return Err(DatumError::field(
                    "metadata",
                    format!("key must be bytes, found {}", key.kind()),
                ));
            };
            let key = String::from_utf8(raw.to_vec()).map_err(|_| {
                DatumError::field(
                    "metadata",
                    format!("key 0x{} is not valid UTF-8", hex::encode(raw)),
                )
            })?;
            if decoded.contains_key(&key) {
                return Err(DatumError::field(
                    "metadata",
                    format!("duplicate key `{key}`"),
                ));
            }
            decoded.insert(key, value.clone());
        }

        let version = version.as_integer().ok_or_else(|| {
            DatumError::field("version", format!("expected an integer, found {}", version.kind()))
        })?;

        Ok(Self {
            metadata: decoded,
            version,
            extra: extra.clone(),
        })
    }

    pub fn to_plutus(&self) -> PlutusData {
        PlutusData::Constr {
            tag: CIP68_CONSTR,
            fields: vec![
                PlutusData::Map(
                    self.metadata
                        .iter()
                        .map(|(k, v)| (PlutusData::Bytes(k.as_bytes().to_vec()), v.clone()))
                        .collect(),
                ),
                PlutusData::Integer(self.version),
                self.extra.clone(),
            ],
        }
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self, DatumError> {
        Self::from_plutus(&PlutusData::from_cbor(bytes)?)
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>, DatumError> {
        self.to_plutus().to_cbor()
    }

    /// Compact JSON text. Integers are written at full `i128` width.
    pub fn to_json(&self) -> Result<String, DatumError> {
        serde_json::to_string(self).map_err(|e| DatumError::Json(e.to_string()))
    }

    /// Parse the JSON form. Nesting is held to the same bound as CBOR input.
    pub fn from_json(text: &str) -> Result<Self, DatumError> {
        let datum: Self =
            serde_json::from_str(text).map_err(|e| DatumError::Json(e.to_string()))?;
        let depth = datum
            .metadata
            .values()
            .chain(std::iter::once(&datum.extra))
            .map(PlutusData::depth)
            .max()
            .unwrap_or(0);
        // +2 for the datum constructor and the metadata map around the values.
        if depth + 2 > MAX_DEPTH {
            return Err(DatumError::TooDeep(MAX_DEPTH));
        }
        Ok(datum)
    }
}

/// Metadata object with keys checked for uniqueness, as on the chain side.
fn unique_metadata<'de, D>(deserializer: D) -> Result<IndexMap<String, PlutusData>, D::Error>
where
    D: Deserializer<'de>,
{
    struct MetadataVisitor;

    impl<'de> Visitor<'de> for MetadataVisitor {
        type Value = IndexMap<String, PlutusData>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a metadata object")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut out = IndexMap::with_capacity(map.size_hint().unwrap_or(0));
            while let Some(key) = map.next_key::<String>()? {
                if out.contains_key(&key) {
                    return Err(serde::de::Error::custom(format!(
                        "metadata: duplicate key `{key}`"
                    )));
                }
                let value = map.next_value::<PlutusData>()?;
                out.insert(key, value);
            }
            Ok(out)
        }
    }

    deserializer.deserialize_map(MetadataVisitor)
}
