use std::sync::{Arc, Mutex};

use futures_util::stream;
use hopline_client::{
    ChainClient, ChainConfig, ChainError, ClientConfig, FlushError, GameClient, Received,
    RetryPolicy, SubmitReceipt, TransactionBundler, TxReceipt,
};
use hopline_core::{AggregatorState, PendingTransaction, SequentialIds, SessionId};
use serde_json::{Value, json};

/// Chain client that records every bundle it is handed.
#[derive(Clone, Default)]
struct Recording {
    submitted: Arc<Mutex<Vec<PendingTransaction>>>,
    fail_with: Option<ChainError>,
}

impl Recording {
    fn failing(err: ChainError) -> Self {
        Self {
            fail_with: Some(err),
            ..Self::default()
        }
    }

    fn submitted(&self) -> Vec<PendingTransaction> {
        self.submitted.lock().unwrap().clone()
    }
}

impl ChainClient for Recording {
    async fn submit(&self, bundle: &PendingTransaction) -> Result<TxReceipt, ChainError> {
        self.submitted.lock().unwrap().push(bundle.clone());
        match &self.fail_with {
            Some(err) => Err(err.clone()),
            None => Ok(TxReceipt {
                reference: format!("0x{}", bundle.session_id()),
            }),
        }
    }
}

fn offline_client() -> GameClient {
    GameClient::with_ids(
        &ClientConfig::default(),
        TransactionBundler::offline(),
        Box::new(SequentialIds::new("S")),
    )
}

fn recording_client(chain: &Recording) -> GameClient<Recording> {
    GameClient::with_ids(
        &ClientConfig::default(),
        TransactionBundler::with_client(chain.clone()),
        Box::new(SequentialIds::new("S")),
    )
}

/// Feed messages one millisecond apart; return the bundles produced.
fn feed<C: ChainClient>(
    client: &mut GameClient<C>,
    start: u64,
    messages: &[Value],
) -> Vec<PendingTransaction> {
    messages
        .iter()
        .enumerate()
        .filter_map(|(i, raw)| client.receive_at(raw, start + i as u64).bundle().cloned())
        .collect()
}

fn bundle(id: &str, jumps: u64, score: u64, revive_used: bool) -> PendingTransaction {
    PendingTransaction::new(SessionId::from(id), jumps, score, revive_used)
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_basic_session_bundle() {
    let mut client = offline_client();
    let bundles = feed(
        &mut client,
        1_000,
        &[
            json!({"type": "START"}),
            json!({"type": "JUMP"}),
            json!({"type": "JUMP"}),
            json!({"type": "SCORE", "score": 40}),
            json!({"type": "SCORE", "score": 25}),
            json!({"type": "GAME_OVER"}),
        ],
    );

    assert_eq!(bundles, vec![bundle("S1", 2, 40, false)]);
    assert_eq!(client.state(), AggregatorState::Ended);
}

#[test]
fn test_revive_with_stale_game_id() {
    let mut client = offline_client();
    feed(&mut client, 1_000, &[json!({"type": "START"}), json!({"type": "GAME_OVER"})]);

    let bundles = feed(
        &mut client,
        2_000,
        &[
            json!({"type": "START"}),
            json!({"type": "PURCHASE_REVIVE"}),
            json!({"type": "REVIVE_USED", "gameId": "stale123"}),
            json!({"type": "GAME_OVER"}),
        ],
    );

    assert_eq!(bundles, vec![bundle("S2", 0, 0, true)]);
}

#[test]
fn test_revive_applied_once() {
    let mut client = offline_client();
    feed(
        &mut client,
        1_000,
        &[
            json!({"type": "START", "gameId": "g1"}),
            json!({"type": "PURCHASE_REVIVE"}),
            json!({"type": "REVIVE_USED", "gameId": "g1"}),
        ],
    );

    let second = client.receive_at(&json!({"type": "REVIVE_USED", "gameId": "stale"}), 1_010);
    assert_eq!(second.rule(), "revive_no_pending");

    let bundles = feed(&mut client, 1_020, &[json!({"type": "GAME_OVER"})]);
    assert_eq!(bundles, vec![bundle("S1", 0, 0, true)]);
}

#[test]
fn test_start_discards_pending_revive() {
    let mut client = offline_client();
    let superseded = feed(
        &mut client,
        1_000,
        &[
            json!({"type": "START"}),
            json!({"type": "PURCHASE_REVIVE"}),
            json!({"type": "START"}),
        ],
    );
    assert_eq!(superseded, vec![bundle("S1", 0, 0, false)]);
    assert_eq!(client.pending_revive(), None);

    let late_revive = client.receive_at(&json!({"type": "REVIVE_USED"}), 1_010);
    assert_eq!(late_revive.rule(), "revive_no_pending");

    let bundles = feed(&mut client, 1_020, &[json!({"type": "GAME_OVER"})]);
    assert_eq!(bundles, vec![bundle("S2", 0, 0, false)]);
}

#[test]
fn test_double_game_over_flushes_once() {
    let mut client = offline_client();
    let bundles = feed(
        &mut client,
        1_000,
        &[
            json!({"type": "START"}),
            json!({"type": "JUMP"}),
            json!({"type": "GAME_OVER"}),
            json!({"type": "GAME_OVER"}),
        ],
    );

    assert_eq!(bundles.len(), 1);
    let third = client.receive_at(&json!({"type": "GAME_OVER"}), 1_010);
    assert_eq!(third.rule(), "duplicate_game_over");
    assert_eq!(third.bundle(), None);
}

#[test]
fn test_score_order_does_not_matter() {
    for scores in [[10, 40, 25], [40, 25, 10], [25, 10, 40]] {
        let mut client = offline_client();
        let mut messages = vec![json!({"type": "START"})];
        messages.extend(scores.iter().map(|s| json!({"type": "SCORE", "score": s})));
        messages.push(json!({"type": "GAME_OVER"}));

        let bundles = feed(&mut client, 0, &messages);
        assert_eq!(bundles[0].score(), 40, "order: {scores:?}");
    }
}

#[test]
fn test_jump_total_matches_deltas() {
    let mut client = offline_client();
    let bundles = feed(
        &mut client,
        0,
        &[
            json!({"type": "START"}),
            json!({"type": "JUMP", "jumps": 3}),
            json!({"type": "JUMP"}),
            json!({"type": "JUMP", "jumps": 0}),
            json!({"type": "JUMP", "delta": 2}),
            json!({"type": "GAME_OVER"}),
        ],
    );

    // Missing and zero deltas count as one jump.
    assert_eq!(bundles[0].jumps(), 7);
    assert_eq!(client.jump_counter(), 7);
}

#[test]
fn test_late_events_dropped_within_grace() {
    let mut client = offline_client();
    feed(&mut client, 1_000, &[json!({"type": "START"}), json!({"type": "GAME_OVER"})]);

    let late = client.receive_at(&json!({"type": "JUMP"}), 2_000);
    assert_eq!(late.rule(), "late_event_ended_session");

    let after_grace = client.receive_at(&json!({"type": "JUMP"}), 10_000);
    assert_eq!(after_grace.rule(), "no_active_session");
    assert_eq!(client.jump_counter(), 0);
}

#[test]
fn test_malformed_messages_are_rejected() {
    let mut client = offline_client();
    let inputs = [
        Value::Null,
        json!(42),
        json!({"kind": "START"}),
        json!({"type": "TELEPORT"}),
        json!({"type": "SCORE", "score": "many"}),
    ];
    for raw in inputs {
        assert!(
            matches!(client.receive_at(&raw, 0), Received::Rejected(_)),
            "raw: {raw}"
        );
    }
    assert_eq!(client.state(), AggregatorState::Idle);
}

// ============================================================================
// Chain Modes
// ============================================================================

#[test]
fn test_incomplete_chain_config_runs_offline() {
    let config = ClientConfig {
        chain: ChainConfig {
            provider: Some("https://rpc.example".into()),
            ..ChainConfig::default()
        },
        ..ClientConfig::default()
    };
    let client = GameClient::new(&config, |_| Ok(Recording::default()));
    assert!(client.is_offline());
}

#[test]
fn test_connector_failure_runs_offline() {
    let config = ClientConfig {
        chain: ChainConfig::new("https://rpc.example", "0xcontract", "0xplayer"),
        ..ClientConfig::default()
    };
    let client = GameClient::new(&config, |_| -> Result<Recording, ChainError> {
        Err(ChainError::Unavailable("no wallet".into()))
    });
    assert!(client.is_offline());
}

#[tokio::test]
async fn test_connected_client_submits_through_retry() {
    let chain = Recording::default();
    let config = ClientConfig {
        chain: ChainConfig::new("https://rpc.example", "0xcontract", "0xplayer"),
        retry: RetryPolicy {
            max_retries: 1,
            base_delay_ms: 1,
        },
        ..ClientConfig::default()
    };
    let handle = chain.clone();
    let mut client = GameClient::new(&config, move |binding| {
        assert_eq!(binding.contract, "0xcontract");
        Ok(handle)
    });
    assert!(!client.is_offline());

    let reports = client
        .run(stream::iter(vec![
            json!({"type": "START"}),
            json!({"type": "JUMP"}),
            json!({"type": "GAME_OVER"}),
        ]))
        .await;

    assert_eq!(reports.len(), 1);
    assert!(matches!(
        reports[0].result,
        Ok(SubmitReceipt::Submitted(_))
    ));
    assert_eq!(chain.submitted().len(), 1);
    assert_eq!(chain.submitted()[0].jumps(), 1);
}

#[tokio::test]
async fn test_run_submits_every_session() {
    let chain = Recording::default();
    let mut client = recording_client(&chain);

    let reports = client
        .run(stream::iter(vec![
            json!({"type": "START"}),
            json!({"type": "SCORE", "score": 5}),
            json!({"type": "GAME_OVER"}),
            json!({"type": "START"}),
            json!({"type": "JUMP"}),
            json!({"type": "GAME_OVER"}),
            json!({"type": "GAME_OVER"}),
        ]))
        .await;

    assert_eq!(reports.len(), 2);
    let mut submitted = chain.submitted();
    submitted.sort_by(|a, b| a.session_id().cmp(b.session_id()));
    assert_eq!(
        submitted,
        vec![bundle("S1", 0, 5, false), bundle("S2", 1, 0, false)]
    );
    for report in &reports {
        assert_eq!(
            report.result.as_ref().unwrap(),
            &SubmitReceipt::Submitted(TxReceipt {
                reference: format!("0x{}", report.bundle.session_id()),
            })
        );
    }
}

#[tokio::test]
async fn test_offline_run_simulates_submission() {
    let mut client = offline_client();
    let reports = client
        .run(stream::iter(vec![
            json!({"type": "START"}),
            json!({"type": "GAME_OVER"}),
        ]))
        .await;

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].bundle, bundle("S1", 0, 0, false));
    assert!(matches!(reports[0].result, Ok(SubmitReceipt::Simulated)));
}

#[tokio::test]
async fn test_failed_submission_keeps_bundle() {
    let chain = Recording::failing(ChainError::Rejected("revert".into()));
    let mut client = recording_client(&chain);

    let bundles = feed(
        &mut client,
        0,
        &[
            json!({"type": "START"}),
            json!({"type": "SCORE", "score": 12}),
            json!({"type": "GAME_OVER"}),
        ],
    );
    let err = client.submit(bundles[0].clone()).await.unwrap_err();

    assert!(matches!(err, FlushError::Submission { .. }));
    assert_eq!(err.bundle(), Some(&bundle("S1", 0, 12, false)));

    // Resubmitting the preserved bundle sends the identical payload.
    let preserved = err.bundle().cloned().unwrap();
    let _ = client.submit(preserved).await;
    let submitted = chain.submitted();
    assert_eq!(submitted.len(), 2);
    assert_eq!(submitted[0], submitted[1]);
}

#[tokio::test]
async fn test_events_keep_flowing_while_submission_pending() {
    let chain = Recording::default();
    let mut client = recording_client(&chain);

    let bundles = feed(
        &mut client,
        0,
        &[json!({"type": "START"}), json!({"type": "GAME_OVER"})],
    );
    let pending = client.submit(bundles[0].clone());

    // The next session proceeds before the first submission is awaited.
    let next = feed(
        &mut client,
        10,
        &[
            json!({"type": "START"}),
            json!({"type": "JUMP"}),
            json!({"type": "GAME_OVER"}),
        ],
    );
    assert_eq!(next, vec![bundle("S2", 1, 0, false)]);

    assert!(pending.await.is_ok());
    assert_eq!(chain.submitted(), vec![bundle("S1", 0, 0, false)]);
}
