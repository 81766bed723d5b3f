//! Emission integration tests
//!
//! Drives a validator from submission to a persisted block:
//! - first block on an empty chain
//! - re-arming when the validator re-elects itself
//! - hand-over when it does not
//! - concurrent submissions never emit the same block twice
//! - rejection by a chain that moved underneath

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use stakechain_ledger::{Block, PeerAddress, Submission, ValidatorSet};
use stakechain_store::{ChainBackend, ChainStore, ChainStoreConfig, LocalChainBackend};
use tempfile::{tempdir, TempDir};

use crate::{
    bootstrap::StaticGenesis,
    service::{ConsensusService, ConsensusServiceBuilder},
    types::{EmissionOutcome, NodeRole},
};

struct Harness {
    _dir: TempDir,
    store: Arc<Mutex<ChainStore>>,
    service: Arc<ConsensusService>,
}

async fn validator(peer: &str) -> Harness {
    let dir = tempdir().unwrap();
    let store = Arc::new(Mutex::new(
        ChainStore::open(ChainStoreConfig::new(dir.path())).unwrap(),
    ));
    let service = Arc::new(
        ConsensusServiceBuilder::new(peer).build(Arc::new(LocalChainBackend::new(store.clone()))),
    );

    let mut genesis = ValidatorSet::new();
    genesis.insert(peer.to_string(), PeerAddress::new("127.0.0.1", 7000));
    let role = service
        .bootstrap(&StaticGenesis::new(genesis))
        .await
        .unwrap();
    assert_eq!(role, NodeRole::Validator);

    Harness {
        _dir: dir,
        store,
        service,
    }
}

fn upload(peer: &str) -> Submission {
    serde_json::from_value(json!({ "peer_id": peer, "filename": "report.pdf" })).unwrap()
}

fn hold_stake(peer: &str, stake: u64, ip: &str, port: u16) -> Submission {
    serde_json::from_value(json!({ "peer_id": peer, "stake": stake, "ip": ip, "port": port }))
        .unwrap()
}

#[tokio::test]
async fn test_first_block_end_to_end() {
    let h = validator("peer-a").await;

    h.service.submit(2, upload("peer-u")).await.unwrap();
    assert!(h.service.wait_for_emission().await.is_none());

    h.service
        .submit(1, hold_stake("peer-s", 3, "10.0.0.1", 9000))
        .await
        .unwrap();

    let outcome = h.service.wait_for_emission().await.unwrap();
    let EmissionOutcome::Accepted { hash } = &outcome else {
        panic!("expected acceptance, got {:?}", outcome);
    };
    assert_eq!(hash.len(), 64);
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));

    let store = h.store.lock();
    let block = store.tip().unwrap();
    assert_eq!(block.block_number(), 1);
    assert_eq!(block.last_block_hash(), "");
    assert_eq!(block.block_hash(), hash.as_str());
    assert_eq!(block.header.validators, vec!["peer-a".to_string()]);

    let mut expected = ValidatorSet::new();
    expected.insert("peer-s".to_string(), PeerAddress::new("10.0.0.1", 9000));
    assert_eq!(block.next_validators(), &expected);

    let value = serde_json::to_value(block).unwrap();
    assert_eq!(
        value["__header"]["nextValidators"],
        json!({ "peer-s": { "ip": "10.0.0.1", "port": 9000 } })
    );
    drop(store);

    // peer-a was not elected for block 2
    assert_eq!(h.service.role(), NodeRole::NonValidator);
    assert!(h.service.pending_block().is_none());
    assert_eq!(h.service.validators(), vec!["peer-s".to_string()]);
}

#[tokio::test]
async fn test_re_elected_validator_stages_successor() {
    let h = validator("peer-a").await;

    h.service.submit(2, upload("peer-u")).await.unwrap();
    h.service
        .submit(1, hold_stake("peer-a", 2, "127.0.0.1", 7000))
        .await
        .unwrap();
    let outcome = h.service.wait_for_emission().await.unwrap();
    assert!(outcome.is_accepted());

    let successor = h.service.pending_block().unwrap();
    let tip_hash = h.store.lock().tip().unwrap().block_hash().to_string();
    assert_eq!(successor.block_number(), 2);
    assert_eq!(successor.last_block_hash(), tip_hash);

    h.service.submit(2, upload("peer-u")).await.unwrap();
    h.service
        .submit(1, hold_stake("peer-a", 2, "127.0.0.1", 7000))
        .await
        .unwrap();
    assert!(h.service.wait_for_emission().await.unwrap().is_accepted());

    let chain = h.store.lock().serialized_chain();
    assert_eq!(chain.len(), 2);
    assert_eq!(chain[1].last_block_hash(), chain[0].block_hash());
    assert_eq!(h.service.stats().blocks_emitted, 2);
}

#[tokio::test]
async fn test_without_stake_nothing_is_emitted() {
    let h = validator("peer-a").await;

    h.service.submit(2, upload("peer-u")).await.unwrap();
    h.service.submit(2, upload("peer-v")).await.unwrap();

    assert!(h.service.wait_for_emission().await.is_none());
    assert!(h.store.lock().is_empty());
    assert_eq!(h.service.pending_block().unwrap().transactions().len(), 2);
    assert_eq!(h.service.stats().emissions_skipped, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_never_double_emit() {
    let h = validator("peer-a").await;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let service = h.service.clone();
        handles.push(tokio::spawn(async move {
            service
                .submit(1, hold_stake("peer-a", 1, "127.0.0.1", 7000))
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    while let Some(outcome) = h.service.wait_for_emission().await {
        assert!(outcome.is_accepted(), "unexpected outcome {:?}", outcome);
    }

    let chain = h.store.lock().serialized_chain();
    assert!(!chain.is_empty());
    for (i, block) in chain.iter().enumerate() {
        assert_eq!(block.block_number(), i as u64 + 1);
        if i > 0 {
            assert_eq!(block.last_block_hash(), chain[i - 1].block_hash());
        }
    }

    let persisted: usize = chain.iter().map(|b| b.transactions().len()).sum();
    let pending = h
        .service
        .pending_block()
        .map(|b| b.transactions().len())
        .unwrap_or(0);
    assert_eq!(persisted + pending, 16);
}

#[tokio::test]
async fn test_rejected_emission_rebases_on_new_tip() {
    let h = validator("peer-a").await;
    h.service.submit(2, upload("peer-u")).await.unwrap();

    // Another entry point extends the chain first, re-electing peer-a
    let mut foreign = Block::stage(None, vec![]);
    foreign
        .header
        .next_validators
        .insert("peer-a".to_string(), PeerAddress::new("127.0.0.1", 7000));
    let backend = LocalChainBackend::new(h.store.clone());
    assert!(backend.add_block(foreign).await.unwrap().is_accepted());

    h.service
        .submit(1, hold_stake("peer-a", 4, "127.0.0.1", 7000))
        .await
        .unwrap();
    let outcome = h.service.wait_for_emission().await.unwrap();
    assert!(matches!(outcome, EmissionOutcome::Rejected(_)));

    let pending = h.service.pending_block().unwrap();
    assert_eq!(pending.block_number(), 2);
    assert_eq!(pending.transactions().len(), 2);
    assert_eq!(
        pending.last_block_hash(),
        h.store.lock().tip().unwrap().block_hash()
    );

    // The next submission emits on the new tip
    h.service.submit(2, upload("peer-v")).await.unwrap();
    assert!(h.service.wait_for_emission().await.unwrap().is_accepted());
    assert_eq!(h.store.lock().len(), 2);
}
