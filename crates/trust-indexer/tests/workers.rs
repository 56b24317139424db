use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tempfile::tempdir;
use tokio::time::sleep;
use trust_core::{
    AssetName, DatumOption, PlutusData, PolicyId, Registration, TokenSelector, Utxo, UtxoRef,
    Value, TRUSTED_TOKEN_NAME,
};
use trust_indexer::{
    spawn_supervised_with, ContractPoller, ContractSpec, DocumentStore, Purpose, SourceError,
    StaticUtxoSource, SupervisorConfig, UtxoSource,
};

const POLICY: PolicyId = PolicyId([0x77; 28]);

fn fast_supervisor() -> SupervisorConfig {
    SupervisorConfig {
        restart_base: Duration::from_millis(10),
        restart_max: Duration::from_millis(50),
    }
}

fn contract(name: &str) -> ContractSpec {
    ContractSpec {
        name: name.to_string(),
        address: format!("addr_test1_{name}"),
        selector: TokenSelector::trusted(POLICY),
    }
}

fn registration(index: u32, subject: u8) -> Utxo {
    let datum = Registration {
        subject: PlutusData::Bytes(vec![subject]),
        signer: vec![0x5e; 28],
        metadata: None,
    }
    .to_cbor()
    .expect("encode");
    Utxo {
        reference: UtxoRef::new("9a".repeat(32), index),
        address: "addr_test1".to_string(),
        value: Value::lovelace(1_000_000).with_asset(
            POLICY,
            AssetName(TRUSTED_TOKEN_NAME.to_vec()),
            1,
        ),
        datum: Some(DatumOption::Inline(datum)),
    }
}

async fn wait_for<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if check().await {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_contract_does_not_affect_others() {
    let dir = tempdir().expect("tmpdir");
    let store = DocumentStore::open(dir.path()).unwrap();
    let source = Arc::new(StaticUtxoSource::new());
    source.fail(
        "addr_test1_alpha",
        SourceError::Network("connection reset by peer".into()),
    );
    source.set_utxos("addr_test1_beta", vec![registration(0, 0xaa)]);

    let interval = Duration::from_millis(30);
    let alpha = spawn_supervised_with(
        ContractPoller::new(contract("alpha"), source.clone(), store.clone(), interval),
        fast_supervisor(),
    );
    let beta = spawn_supervised_with(
        ContractPoller::new(contract("beta"), source.clone(), store.clone(), interval),
        fast_supervisor(),
    );

    wait_for("both contracts to cycle twice", || {
        let (alpha, beta) = (alpha.clone(), beta.clone());
        async move {
            alpha.snapshot().await.cycles_failed >= 2 && beta.snapshot().await.cycles_ok >= 2
        }
    })
    .await;

    assert_eq!(store.read("alpha", Purpose::Subjects).unwrap(), None);
    let beta_subjects = store.read("beta", Purpose::Subjects).unwrap().unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&beta_subjects).unwrap();
    assert_eq!(parsed[0]["subject"]["bytes"], "aa");

    let alpha_status = alpha.snapshot().await;
    assert_eq!(alpha_status.cycles_ok, 0);
    assert!(alpha_status
        .last_error
        .unwrap()
        .contains("connection reset by peer"));
    assert_eq!(beta.snapshot().await.last_error, None);

    alpha.shutdown();
    beta.shutdown();
}

/// Panics on the first `panics` fetches, then serves the inner source.
struct PanickingSource {
    inner: StaticUtxoSource,
    panics: AtomicU32,
}

#[async_trait]
impl UtxoSource for PanickingSource {
    async fn utxos(&self, address: &str) -> Result<Vec<Utxo>, SourceError> {
        if self
            .panics
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            panic!("unreachable schema branch");
        }
        self.inner.utxos(address).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_worker_is_restarted() {
    let dir = tempdir().expect("tmpdir");
    let store = DocumentStore::open(dir.path()).unwrap();
    let inner = StaticUtxoSource::new();
    inner.set_utxos("addr_test1_gamma", vec![registration(3, 0x01)]);
    let source = Arc::new(PanickingSource {
        inner,
        panics: AtomicU32::new(2),
    });

    let handle = spawn_supervised_with(
        ContractPoller::new(
            contract("gamma"),
            source,
            store.clone(),
            Duration::from_millis(20),
        ),
        fast_supervisor(),
    );

    wait_for("a successful cycle after restarts", || {
        let handle = handle.clone();
        async move { handle.snapshot().await.cycles_ok >= 1 }
    })
    .await;

    let status = handle.snapshot().await;
    assert_eq!(status.restarts, 2);
    assert!(store.read("gamma", Purpose::Signers).unwrap().is_some());
    handle.shutdown();
}

#[tokio::test]
async fn shutdown_stops_cycling() {
    let dir = tempdir().expect("tmpdir");
    let store = DocumentStore::open(dir.path()).unwrap();
    let source = Arc::new(StaticUtxoSource::new());
    let handle = spawn_supervised_with(
        ContractPoller::new(contract("delta"), source.clone(), store, Duration::from_millis(10)),
        fast_supervisor(),
    );

    wait_for("first cycle", || {
        let handle = handle.clone();
        async move { handle.snapshot().await.cycles_ok >= 1 }
    })
    .await;
    handle.shutdown();
    sleep(Duration::from_millis(50)).await;
    let calls = source.calls();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(source.calls(), calls);
}
