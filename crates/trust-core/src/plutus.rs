//! Generic chain data ("Plutus data") and its two wire forms.
//!
//! The chain side is CBOR: constructor applications are CBOR tags (121..=127 for
//! alternatives 0..=6, 1280..=1400 for 7..=127, tag 102 for the general form),
//! integers beyond 64 bits use the bignum tags 2/3.
//!
//! The JSON side is the tagged form used by chain tooling:
//! `{"int":n}`, `{"bytes":"<hex>"}`, `{"list":[..]}`, `{"map":[{"k":..,"v":..}]}`,
//! `{"constructor":n,"fields":[..]}`.
//!
//! Datums are attacker-controlled, so decoding enforces [`MAX_DATUM_BYTES`] and
//! [`MAX_DEPTH`].

use std::fmt;
use std::io::Cursor;

use ciborium::value::{Integer, Value};
use serde::de::{self, MapAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Upper bound on the encoded size of a single datum.
pub const MAX_DATUM_BYTES: usize = 64 * 1024;

/// Upper bound on nesting of lists, maps and constructors.
pub const MAX_DEPTH: usize = 64;

const TAG_POS_BIGNUM: u64 = 2;
const TAG_NEG_BIGNUM: u64 = 3;
const TAG_CONSTR_GENERAL: u64 = 102;
const TAG_CONSTR_SMALL: u64 = 121;
const TAG_CONSTR_LARGE: u64 = 1280;

/// Generic structured chain data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PlutusData {
    Constr { tag: u64, fields: Vec<PlutusData> },
    Map(Vec<(PlutusData, PlutusData)>),
    List(Vec<PlutusData>),
    Integer(i128),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatumError {
    #[error("datum is {actual} bytes, limit is {limit}")]
    TooLarge { actual: usize, limit: usize },
    #[error("cbor decode error: {0}")]
    Cbor(String),
    #[error("{0} trailing bytes after datum")]
    TrailingBytes(usize),
    #[error("nesting exceeds depth {0}")]
    TooDeep(usize),
    #[error("unsupported data item: {0}")]
    Unsupported(String),
    #[error("integer does not fit in 128 bits")]
    IntegerOverflow,
    #[error("field `{field}`: {reason}")]
    Field { field: String, reason: String },
    #[error("json error: {0}")]
    Json(String),
}

impl DatumError {
    pub fn field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Field {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Prefix the offending field path with `parent`.
    pub fn within(self, parent: &str) -> Self {
        match self {
            Self::Field { field, reason } => Self::Field {
                field: format!("{parent}.{field}"),
                reason,
            },
            other => Self::Field {
                field: parent.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

impl PlutusData {
    /// Decode a single CBOR-encoded datum. Trailing bytes are rejected.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, DatumError> {
        if bytes.len() > MAX_DATUM_BYTES {
            return Err(DatumError::TooLarge {
                actual: bytes.len(),
                limit: MAX_DATUM_BYTES,
            });
        }
        let mut cursor = Cursor::new(bytes);
        let value: Value = ciborium::de::from_reader(&mut cursor)
            .map_err(|e| DatumError::Cbor(format!("{e:?}")))?;
        let consumed = usize::try_from(cursor.position()).unwrap_or(usize::MAX);
        if consumed < bytes.len() {
            return Err(DatumError::TrailingBytes(bytes.len() - consumed));
        }
        Self::from_cbor_value(&value, 0)
    }

    /// Encode as CBOR (definite-length containers).
    pub fn to_cbor(&self) -> Result<Vec<u8>, DatumError> {
        let mut out = Vec::new();
        ciborium::ser::into_writer(&self.to_cbor_value(), &mut out)
            .map_err(|e| DatumError::Cbor(format!("{e:?}")))?;
        Ok(out)
    }

    /// Deepest container nesting; scalars have depth 0.
    pub fn depth(&self) -> usize {
        match self {
            PlutusData::Constr { fields, .. } | PlutusData::List(fields) => {
                1 + fields.iter().map(PlutusData::depth).max().unwrap_or(0)
            }
            PlutusData::Map(entries) => {
                1 + entries
                    .iter()
                    .map(|(k, v)| k.depth().max(v.depth()))
                    .max()
                    .unwrap_or(0)
            }
            PlutusData::Integer(_) | PlutusData::Bytes(_) => 0,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            PlutusData::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i128> {
        match self {
            PlutusData::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Fields of a constructor application with the expected alternative.
    pub(crate) fn constr_fields(&self, tag: u64, what: &str) -> Result<&[PlutusData], DatumError> {
        match self {
            PlutusData::Constr { tag: t, fields } if *t == tag => Ok(fields),
            PlutusData::Constr { tag: t, .. } => Err(DatumError::field(
                what,
                format!("expected constructor {tag}, found constructor {t}"),
            )),
            other => Err(DatumError::field(
                what,
                format!("expected constructor {tag}, found {}", other.kind()),
            )),
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            PlutusData::Constr { .. } => "constructor",
            PlutusData::Map(_) => "map",
            PlutusData::List(_) => "list",
            PlutusData::Integer(_) => "integer",
            PlutusData::Bytes(_) => "bytes",
        }
    }

    fn from_cbor_value(value: &Value, depth: usize) -> Result<Self, DatumError> {
        if depth > MAX_DEPTH {
            return Err(DatumError::TooDeep(MAX_DEPTH));
        }
        match value {
            Value::Integer(i) => Ok(PlutusData::Integer(i128::from(*i))),
            Value::Bytes(b) => Ok(PlutusData::Bytes(b.clone())),
            Value::Array(items) => Ok(PlutusData::List(Self::from_cbor_items(items, depth)?)),
            Value::Map(entries) => {
                let mut out = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    out.push((
                        Self::from_cbor_value(k, depth + 1)?,
                        Self::from_cbor_value(v, depth + 1)?,
                    ));
                }
                Ok(PlutusData::Map(out))
            }
            Value::Tag(tag, inner) => Self::from_cbor_tag(*tag, inner, depth),
            Value::Text(_) => Err(DatumError::Unsupported("text string".to_string())),
            Value::Float(_) => Err(DatumError::Unsupported("float".to_string())),
            Value::Bool(_) => Err(DatumError::Unsupported("bool".to_string())),
            Value::Null => Err(DatumError::Unsupported("null".to_string())),
            other => Err(DatumError::Unsupported(format!("{other:?}"))),
        }
    }

    fn from_cbor_items(items: &[Value], depth: usize) -> Result<Vec<Self>, DatumError> {
        items
            .iter()
            .map(|v| Self::from_cbor_value(v, depth + 1))
            .collect()
    }

    fn from_cbor_tag(tag: u64, inner: &Value, depth: usize) -> Result<Self, DatumError> {
        match tag {
            TAG_POS_BIGNUM | TAG_NEG_BIGNUM => {
                let Value::Bytes(magnitude) = inner else {
                    return Err(DatumError::Unsupported(format!(
                        "bignum tag {tag} without byte string"
                    )));
                };
                let n = bignum_magnitude(magnitude)?;
                let value = if tag == TAG_POS_BIGNUM {
                    i128::try_from(n).map_err(|_| DatumError::IntegerOverflow)?
                } else {
                    let n = i128::try_from(n).map_err(|_| DatumError::IntegerOverflow)?;
                    -1 - n
                };
                Ok(PlutusData::Integer(value))
            }
            TAG_CONSTR_SMALL..=127 => {
                Self::constr_from_cbor(tag - TAG_CONSTR_SMALL, inner, depth)
            }
            TAG_CONSTR_LARGE..=1400 => {
                Self::constr_from_cbor(tag - TAG_CONSTR_LARGE + 7, inner, depth)
            }
            TAG_CONSTR_GENERAL => {
                let Value::Array(parts) = inner else {
                    return Err(DatumError::Unsupported(
                        "general constructor without array".to_string(),
                    ));
                };
                match parts.as_slice() {
                    [Value::Integer(alt), fields] => {
                        let alt = u64::try_from(*alt).map_err(|_| {
                            DatumError::Unsupported("negative constructor index".to_string())
                        })?;
                        Self::constr_from_cbor(alt, fields, depth)
                    }
                    _ => Err(DatumError::Unsupported(
                        "general constructor must be [index, fields]".to_string(),
                    )),
                }
            }
            other => Err(DatumError::Unsupported(format!("cbor tag {other}"))),
        }
    }

    fn constr_from_cbor(tag: u64, fields: &Value, depth: usize) -> Result<Self, DatumError> {
        match fields {
            Value::Array(items) => Ok(PlutusData::Constr {
                tag,
                fields: Self::from_cbor_items(items, depth)?,
            }),
            _ => Err(DatumError::Unsupported(format!(
                "constructor {tag} fields are not an array"
            ))),
        }
    }

    fn to_cbor_value(&self) -> Value {
        match self {
            PlutusData::Constr { tag, fields } => {
                let fields = Value::Array(fields.iter().map(Self::to_cbor_value).collect());
                match *tag {
                    0..=6 => Value::Tag(TAG_CONSTR_SMALL + tag, Box::new(fields)),
                    7..=127 => Value::Tag(TAG_CONSTR_LARGE + tag - 7, Box::new(fields)),
                    _ => Value::Tag(
                        TAG_CONSTR_GENERAL,
                        Box::new(Value::Array(vec![Value::Integer(Integer::from(*tag)), fields])),
                    ),
                }
            }
            PlutusData::Map(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_cbor_value(), v.to_cbor_value()))
                    .collect(),
            ),
            PlutusData::List(items) => Value::Array(items.iter().map(Self::to_cbor_value).collect()),
            PlutusData::Integer(n) => match Integer::try_from(*n) {
                Ok(i) => Value::Integer(i),
                Err(_) if *n >= 0 => Value::Tag(
                    TAG_POS_BIGNUM,
                    Box::new(Value::Bytes(minimal_be_bytes(n.unsigned_abs()))),
                ),
                // -1 - n is non-negative for every negative n.
                Err(_) => Value::Tag(
                    TAG_NEG_BIGNUM,
                    Box::new(Value::Bytes(minimal_be_bytes((-1 - *n).unsigned_abs()))),
                ),
            },
            PlutusData::Bytes(b) => Value::Bytes(b.clone()),
        }
    }
}

fn bignum_magnitude(bytes: &[u8]) -> Result<u128, DatumError> {
    let significant = match bytes.iter().position(|b| *b != 0) {
        Some(start) => &bytes[start..],
        None => return Ok(0),
    };
    if significant.len() > 16 {
        return Err(DatumError::IntegerOverflow);
    }
    Ok(significant
        .iter()
        .fold(0u128, |acc, b| (acc << 8) | u128::from(*b)))
}

fn minimal_be_bytes(n: u128) -> Vec<u8> {
    let bytes = n.to_be_bytes();
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

// ============== Tagged JSON form ==============

struct Entries<'a>(&'a [(PlutusData, PlutusData)]);

struct Entry<'a>(&'a PlutusData, &'a PlutusData);

impl Serialize for Entries<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for (k, v) in self.0 {
            seq.serialize_element(&Entry(k, v))?;
        }
        seq.end()
    }
}

impl Serialize for Entry<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("k", self.0)?;
        map.serialize_entry("v", self.1)?;
        map.end()
    }
}

impl Serialize for PlutusData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PlutusData::Constr { tag, fields } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("constructor", tag)?;
                map.serialize_entry("fields", fields)?;
                map.end()
            }
            PlutusData::Map(entries) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("map", &Entries(entries))?;
                map.end()
            }
            PlutusData::List(items) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("list", items)?;
                map.end()
            }
            PlutusData::Integer(n) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("int", n)?;
                map.end()
            }
            PlutusData::Bytes(b) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("bytes", &hex::encode(b))?;
                map.end()
            }
        }
    }
}

#[derive(Deserialize)]
struct JsonEntry {
    k: PlutusData,
    v: PlutusData,
}

const TAG_KEYS: &[&str] = &["int", "bytes", "list", "map", "constructor", "fields"];

struct DataVisitor;

impl<'de> Visitor<'de> for DataVisitor {
    type Value = PlutusData;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a tagged chain data object (int, bytes, list, map or constructor)")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<PlutusData, A::Error> {
        let mut scalar: Option<PlutusData> = None;
        let mut constructor: Option<u64> = None;
        let mut fields: Option<Vec<PlutusData>> = None;

        while let Some(key) = map.next_key::<String>()? {
            let parsed = match key.as_str() {
                "int" => PlutusData::Integer(map.next_value::<i128>()?),
                "bytes" => {
                    let s = map.next_value::<String>()?;
                    let b = hex::decode(&s)
                        .map_err(|e| de::Error::custom(format!("bytes: invalid hex: {e}")))?;
                    PlutusData::Bytes(b)
                }
                "list" => PlutusData::List(map.next_value::<Vec<PlutusData>>()?),
                "map" => {
                    let entries = map.next_value::<Vec<JsonEntry>>()?;
                    PlutusData::Map(entries.into_iter().map(|e| (e.k, e.v)).collect())
                }
                "constructor" => {
                    if constructor.replace(map.next_value()?).is_some() {
                        return Err(de::Error::duplicate_field("constructor"));
                    }
                    continue;
                }
                "fields" => {
                    if fields.replace(map.next_value()?).is_some() {
                        return Err(de::Error::duplicate_field("fields"));
                    }
                    continue;
                }
                other => return Err(de::Error::unknown_field(other, TAG_KEYS)),
            };
            if scalar.replace(parsed).is_some() {
                return Err(de::Error::custom("ambiguous chain data object"));
            }
        }

        match (scalar, constructor, fields) {
            (Some(data), None, None) => Ok(data),
            (None, Some(tag), Some(fields)) => Ok(PlutusData::Constr { tag, fields }),
            (None, Some(_), None) => Err(de::Error::missing_field("fields")),
            (None, None, Some(_)) => Err(de::Error::missing_field("constructor")),
            (None, None, None) => Err(de::Error::custom("empty chain data object")),
            _ => Err(de::Error::custom("ambiguous chain data object")),
        }
    }
}

impl<'de> Deserialize<'de> for PlutusData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(DataVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex_cbor(s: &str) -> Vec<u8> {
        hex::decode(s).expect("hex")
    }

    #[test]
    fn decodes_small_constructor_with_bytes() {
        // 121([h'aa', 5])
        let data = PlutusData::from_cbor(&hex_cbor("d8799f41aa05ff")).unwrap();
        assert_eq!(
            data,
            PlutusData::Constr {
                tag: 0,
                fields: vec![PlutusData::Bytes(vec![0xaa]), PlutusData::Integer(5)],
            }
        );
    }

    #[test]
    fn decodes_large_and_general_constructors() {
        // 1280([]) is alternative 7
        let large = PlutusData::from_cbor(&hex_cbor("d9050080")).unwrap();
        assert_eq!(large, PlutusData::Constr { tag: 7, fields: vec![] });

        // 102([200, []])
        let general = PlutusData::from_cbor(&hex_cbor("d8668218c880")).unwrap();
        assert_eq!(general, PlutusData::Constr { tag: 200, fields: vec![] });
    }

    #[test]
    fn constructor_encoding_picks_compact_tag() {
        for tag in [0u64, 6, 7, 127, 128, 5000] {
            let data = PlutusData::Constr {
                tag,
                fields: vec![PlutusData::Integer(1)],
            };
            let back = PlutusData::from_cbor(&data.to_cbor().unwrap()).unwrap();
            assert_eq!(back, data, "tag {tag}");
        }
    }

    #[test]
    fn bignums_round_trip_through_cbor() {
        for n in [i128::MAX, i128::MIN, 1 << 70, -(1 << 70), u64::MAX as i128 + 1] {
            let data = PlutusData::Integer(n);
            let back = PlutusData::from_cbor(&data.to_cbor().unwrap()).unwrap();
            assert_eq!(back, data);
        }
    }

    #[test]
    fn oversized_bignum_is_rejected() {
        // tag 2 with 17 significant bytes
        let mut bytes = vec![0xc2, 0x51];
        bytes.extend(std::iter::repeat(0xff).take(17));
        assert_eq!(
            PlutusData::from_cbor(&bytes),
            Err(DatumError::IntegerOverflow)
        );
    }

    #[test]
    fn rejects_text_floats_and_unknown_tags() {
        assert!(matches!(
            PlutusData::from_cbor(&hex_cbor("6161")),
            Err(DatumError::Unsupported(_))
        ));
        assert!(matches!(
            PlutusData::from_cbor(&hex_cbor("f93c00")),
            Err(DatumError::Unsupported(_))
        ));
        assert!(matches!(
            PlutusData::from_cbor(&hex_cbor("d82a00")),
            Err(DatumError::Unsupported(_))
        ));
    }

    #[test]
    fn rejects_trailing_bytes_and_garbage() {
        assert_eq!(
            PlutusData::from_cbor(&hex_cbor("0000")),
            Err(DatumError::TrailingBytes(1))
        );
        assert!(matches!(
            PlutusData::from_cbor(&hex_cbor("5f")),
            Err(DatumError::Cbor(_))
        ));
    }

    #[test]
    fn enforces_size_and_depth_limits() {
        let big = vec![0u8; MAX_DATUM_BYTES + 1];
        assert!(matches!(
            PlutusData::from_cbor(&big),
            Err(DatumError::TooLarge { .. })
        ));

        // 100 nested single-element arrays around 0
        let mut nested = vec![0x81u8; 100];
        nested.push(0x00);
        assert_eq!(
            PlutusData::from_cbor(&nested),
            Err(DatumError::TooDeep(MAX_DEPTH))
        );
    }

    #[test]
    fn indefinite_containers_are_accepted() {
        // [_ 1, 2] and (_ h'aa', h'bb')
        let list = PlutusData::from_cbor(&hex_cbor("9f0102ff")).unwrap();
        assert_eq!(
            list,
            PlutusData::List(vec![PlutusData::Integer(1), PlutusData::Integer(2)])
        );
        let chunked = PlutusData::from_cbor(&hex_cbor("5f41aa41bbff")).unwrap();
        assert_eq!(chunked, PlutusData::Bytes(vec![0xaa, 0xbb]));
    }

    #[test]
    fn tagged_json_shape() {
        let data = PlutusData::Constr {
            tag: 0,
            fields: vec![
                PlutusData::Bytes(vec![0xde, 0xad]),
                PlutusData::Map(vec![(PlutusData::Integer(1), PlutusData::List(vec![]))]),
            ],
        };
        let json = serde_json::to_string(&data).unwrap();
        assert_eq!(
            json,
            r#"{"constructor":0,"fields":[{"bytes":"dead"},{"map":[{"k":{"int":1},"v":{"list":[]}}]}]}"#
        );
        let back: PlutusData = serde_json::from_str(&json).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn tagged_json_accepts_fields_before_constructor() {
        let back: PlutusData =
            serde_json::from_str(r#"{"fields":[{"int":-3}],"constructor":2}"#).unwrap();
        assert_eq!(
            back,
            PlutusData::Constr {
                tag: 2,
                fields: vec![PlutusData::Integer(-3)]
            }
        );
    }

    #[test]
    fn tagged_json_keeps_128_bit_integers() {
        let json = format!(r#"{{"int":{}}}"#, i128::MIN);
        let back: PlutusData = serde_json::from_str(&json).unwrap();
        assert_eq!(back, PlutusData::Integer(i128::MIN));
        assert_eq!(serde_json::to_string(&back).unwrap(), json);
    }

    #[test]
    fn tagged_json_rejects_ambiguous_and_unknown_objects() {
        assert!(serde_json::from_str::<PlutusData>(r#"{"int":1,"bytes":"aa"}"#).is_err());
        assert!(serde_json::from_str::<PlutusData>(r#"{"string":"x"}"#).is_err());
        assert!(serde_json::from_str::<PlutusData>(r#"{}"#).is_err());
        assert!(serde_json::from_str::<PlutusData>(r#"{"constructor":1}"#).is_err());
        assert!(serde_json::from_str::<PlutusData>(r#"{"bytes":"zz"}"#).is_err());
    }

    #[test]
    fn within_prefixes_field_paths() {
        let err = DatumError::field("version", "expected an integer").within("metadata");
        assert_eq!(
            err,
            DatumError::field("metadata.version", "expected an integer")
        );
        let err = DatumError::TooDeep(MAX_DEPTH).within("extra");
        assert!(matches!(err, DatumError::Field { ref field, .. } if field == "extra"));
    }
}
