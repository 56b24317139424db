use indexmap::IndexMap;
use serde_json::json;
use trust_core::{
    build_indices, render, validate_all, AssetName, Cip68Datum, DatumOption, PlutusData, PolicyId,
    Registration, TokenSelector, Utxo, UtxoRef, Value, TRUSTED_TOKEN_NAME,
};

const POLICY: PolicyId = PolicyId([0x5a; 28]);
const TX: &str = "1f0c7ad2a9b4e6d1c0ffee00112233445566778899aabbccddeeff0011223344";

fn trusted() -> AssetName {
    AssetName(TRUSTED_TOKEN_NAME.to_vec())
}

fn output(index: u32, amount: u64, datum: Option<Vec<u8>>) -> Utxo {
    let mut value = Value::lovelace(1_500_000);
    if amount > 0 {
        value.add_asset(POLICY, trusted(), amount);
    }
    Utxo {
        reference: UtxoRef::new(TX, index),
        address: "addr_test1wtrust".to_string(),
        value,
        datum: datum.map(DatumOption::Inline),
    }
}

fn registration(subject: &[u8], signer: &[u8], metadata: Option<Cip68Datum>) -> Vec<u8> {
    Registration {
        subject: PlutusData::Bytes(subject.to_vec()),
        signer: signer.to_vec(),
        metadata,
    }
    .to_cbor()
    .expect("encode registration")
}

fn documents(snapshot: &[Utxo]) -> (String, String) {
    let report = validate_all(snapshot, &TokenSelector::trusted(POLICY));
    let indices = build_indices(&report.accepted);
    (
        render(&indices.subjects).expect("render subjects"),
        render(&indices.signers).expect("render signers"),
    )
}

#[test]
fn three_output_example() {
    let snapshot = vec![
        output(0, 1, Some(registration(&[0xaa], &[0xbb], None))),
        output(1, 0, Some(registration(&[0xcc], &[0xdd], None))),
        output(2, 1, Some(vec![0xd8, 0x79, 0x9f])),
    ];
    let (subjects, _) = documents(&snapshot);
    let subjects: serde_json::Value = serde_json::from_str(&subjects).unwrap();
    assert_eq!(
        subjects,
        json!([{
            "subject": {"bytes": "aa"},
            "verifiers": [{"signer": "bb", "utxo": format!("{TX}#0"), "metadata": null}]
        }])
    );
}

#[test]
fn pipeline_is_idempotent() {
    let mut metadata = IndexMap::new();
    metadata.insert("name".to_string(), PlutusData::Bytes(b"Alpha".to_vec()));
    let datum = Cip68Datum {
        metadata,
        version: 1,
        extra: PlutusData::List(vec![PlutusData::Integer(-7)]),
    };
    let snapshot = vec![
        output(0, 1, Some(registration(&[1], &[9], Some(datum)))),
        output(1, 1, Some(registration(&[2], &[9], None))),
        output(2, 1, Some(registration(&[1], &[8], None))),
        output(3, 2, Some(registration(&[3], &[8], None))),
    ];
    let first = documents(&snapshot);
    let second = documents(&snapshot);
    assert_eq!(first, second);
    assert!(!first.0.contains(' '));
    assert!(!first.0.contains('\n'));
}

#[test]
fn only_exactly_one_token_is_accepted() {
    for amount in [0u64, 1, 2, 3, u64::MAX] {
        let snapshot = vec![output(0, amount, Some(registration(&[0xaa], &[0xbb], None)))];
        let report = validate_all(&snapshot, &TokenSelector::trusted(POLICY));
        let indices = build_indices(&report.accepted);
        if amount == 1 {
            assert_eq!(indices.subjects.len(), 1, "amount {amount}");
            assert_eq!(indices.signers.len(), 1, "amount {amount}");
        } else {
            assert!(indices.subjects.is_empty(), "amount {amount}");
            assert!(indices.signers.is_empty(), "amount {amount}");
            assert_eq!(report.rejected.get("missing_or_wrong_token_amount"), Some(&1));
        }
    }
}

#[test]
fn absent_metadata_differs_from_empty_metadata() {
    let empty = Cip68Datum {
        metadata: IndexMap::new(),
        version: 1,
        extra: PlutusData::Constr {
            tag: 0,
            fields: vec![],
        },
    };
    let snapshot = vec![
        output(0, 1, Some(registration(&[0x01], &[0xb1], None))),
        output(1, 1, Some(registration(&[0x02], &[0xb1], Some(empty)))),
    ];
    let (subjects, _) = documents(&snapshot);
    let subjects: serde_json::Value = serde_json::from_str(&subjects).unwrap();

    let absent = &subjects[0]["verifiers"][0];
    assert_eq!(absent["metadata"], serde_json::Value::Null);
    assert!(absent.get("version").is_none());
    assert!(absent.get("extra").is_none());

    let present = &subjects[1]["verifiers"][0];
    assert_eq!(present["metadata"], json!({}));
    assert_eq!(present["version"], json!(1));
    assert_eq!(present["extra"], json!({"constructor": 0, "fields": []}));
}

#[test]
fn every_pair_appears_in_both_documents() {
    let mut snapshot = Vec::new();
    let mut index = 0;
    for subject in 0u8..5 {
        for signer in 0u8..4 {
            if (subject + signer) % 3 == 0 {
                continue;
            }
            snapshot.push(output(index, 1, Some(registration(&[subject], &[0xf0 | signer], None))));
            index += 1;
        }
    }
    let (subjects, signers) = documents(&snapshot);
    let subjects: serde_json::Value = serde_json::from_str(&subjects).unwrap();
    let signers: serde_json::Value = serde_json::from_str(&signers).unwrap();

    let mut from_subjects = Vec::new();
    for entry in subjects.as_array().unwrap() {
        for verifier in entry["verifiers"].as_array().unwrap() {
            from_subjects.push((
                entry["subject"].to_string(),
                verifier["signer"].as_str().unwrap().to_string(),
                verifier["utxo"].as_str().unwrap().to_string(),
            ));
        }
    }
    let mut from_signers = Vec::new();
    for entry in signers.as_array().unwrap() {
        for signed in entry["subjects"].as_array().unwrap() {
            assert_eq!(signed["signature"]["signer"], entry["signer"]);
            from_signers.push((
                signed["subject"].to_string(),
                entry["signer"].as_str().unwrap().to_string(),
                signed["signature"]["utxo"].as_str().unwrap().to_string(),
            ));
        }
    }
    assert_eq!(from_subjects.len(), snapshot.len());
    from_subjects.sort();
    from_signers.sort();
    assert_eq!(from_subjects, from_signers);
}

#[test]
fn malformed_records_do_not_stop_the_batch() {
    let mut bad_key = Vec::new();
    // Constr 0 [h'01', h'02', Constr 0 [{h'ff': 1}, 1, 0]]
    bad_key.extend_from_slice(&[0xd8, 0x79, 0x83, 0x41, 0x01, 0x41, 0x02]);
    bad_key.extend_from_slice(&[0xd8, 0x79, 0x83, 0xa1, 0x41, 0xff, 0x01, 0x01, 0x00]);

    let mut hash_only = output(1, 1, None);
    hash_only.datum = Some(DatumOption::Hash("ab".repeat(32)));

    let snapshot = vec![
        output(0, 1, Some(bad_key)),
        hash_only,
        output(2, 1, None),
        output(3, 1, Some(registration(&[0x07], &[0x08], None))),
    ];
    let report = validate_all(&snapshot, &TokenSelector::trusted(POLICY));
    assert_eq!(report.accepted.len(), 1);
    assert_eq!(report.rejected.get("malformed_datum"), Some(&1));
    assert_eq!(report.rejected.get("unresolved_datum"), Some(&1));
    assert_eq!(report.rejected.get("missing_datum"), Some(&1));
}
