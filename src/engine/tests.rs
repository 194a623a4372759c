#![allow(non_snake_case)]

use super::*;
use crate::{
    error::GameError,
    game::GameOutcome,
    session::CONNECT_PROMPT,
    test_helpers::{
        FakeLedger,
        FakeWallet,
        LedgerCall,
        account,
        raw_record,
    },
};
use std::time::Duration;

type TestEngine = SessionEngine<FakeWallet, FakeLedger>;

fn engine_for(wallet: Option<&FakeWallet>, ledger: &FakeLedger) -> TestEngine {
    let gateway = ContractGateway::new(ledger.clone()).with_read_retries(1, Duration::ZERO);
    SessionEngine::new(IdentityTracker::new(wallet.cloned()), gateway)
}

/// Drives the loop until every spawned ledger call has reported back.
async fn settle(engine: &mut TestEngine) {
    while engine.outstanding > 0 {
        engine.step().await;
    }
}

async fn connected(wallet: &FakeWallet, ledger: &FakeLedger) -> TestEngine {
    let mut engine = engine_for(Some(wallet), ledger);
    engine.start().await;
    engine.handle(Command::Connect).await;
    settle(&mut engine).await;
    engine
}

fn timestamps(snapshot: &SessionSnapshot) -> Vec<u64> {
    snapshot
        .history
        .iter()
        .map(|entry| entry.record.timestamp)
        .collect()
}

#[tokio::test]
async fn start__adopts_existing_authorization_without_prompting() {
    // given
    let wallet = FakeWallet::with_accounts(vec![account(1)]);
    wallet.pre_authorize(account(1));
    let ledger = FakeLedger::default();
    ledger.seed_history(account(1), vec![raw_record(account(1), "WIN", 1, 3, 10)]);
    let mut engine = engine_for(Some(&wallet), &ledger);

    // when
    engine.start().await;
    settle(&mut engine).await;

    // then
    let snapshot = engine.snapshot();
    assert_eq!(snapshot.account, Some(account(1)));
    assert_eq!(snapshot.history.len(), 1);
    assert_eq!(wallet.request_count(), 0);
}

#[tokio::test]
async fn handle__connect_without_wallet_reports_missing_wallet() {
    // given
    let ledger = FakeLedger::default();
    let mut engine = engine_for(None, &ledger);
    engine.start().await;

    // when
    engine.handle(Command::Connect).await;

    // then
    let snapshot = engine.snapshot();
    assert!(!snapshot.has_wallet);
    assert_eq!(snapshot.account, None);
    assert!(snapshot.status.starts_with("No wallet found"));
}

#[tokio::test]
async fn handle__connect_rejection_keeps_session_disconnected() {
    let wallet = FakeWallet::with_accounts(vec![account(1)]);
    wallet.reject_requests();
    let ledger = FakeLedger::default();
    let mut engine = engine_for(Some(&wallet), &ledger);

    engine.handle(Command::Connect).await;

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.account, None);
    assert!(snapshot.status.contains("connection rejected"));
    assert!(ledger.calls().is_empty());
}

#[tokio::test]
async fn handle__play_without_account_prompts_and_never_touches_ledger() {
    // given
    let wallet = FakeWallet::with_accounts(vec![account(1)]);
    let ledger = FakeLedger::default();
    let mut engine = engine_for(Some(&wallet), &ledger);
    engine.start().await;

    // when
    engine.handle(Command::Play(1)).await;

    // then
    let snapshot = engine.snapshot();
    assert_eq!(snapshot.status, CONNECT_PROMPT);
    assert!(snapshot.state.is_idle());
    assert!(ledger.calls().is_empty());
}

#[tokio::test]
async fn handle__play_with_out_of_range_choice_never_touches_ledger() {
    // given
    let wallet = FakeWallet::with_accounts(vec![account(1)]);
    let ledger = FakeLedger::default();
    let mut engine = connected(&wallet, &ledger).await;

    // when
    engine.handle(Command::Play(0)).await;
    engine.handle(Command::Play(4)).await;

    // then
    let snapshot = engine.snapshot();
    assert!(snapshot.state.is_idle());
    assert!(snapshot.status.contains("invalid input"));
    assert_eq!(ledger.calls(), vec![LedgerCall::History(account(1))]);
}

#[tokio::test]
async fn handle__successful_play_refreshes_history_exactly_once() {
    // given
    let wallet = FakeWallet::with_accounts(vec![account(1)]);
    let ledger = FakeLedger::default();
    ledger.script_outcome("WIN", 3);
    let mut engine = connected(&wallet, &ledger).await;
    assert_eq!(ledger.history_calls(&account(1)), 1);

    // when
    engine.handle(Command::Play(1)).await;
    settle(&mut engine).await;

    // then
    let snapshot = engine.snapshot();
    assert_eq!(ledger.history_calls(&account(1)), 2);
    assert!(snapshot.state.is_idle());
    assert_eq!(snapshot.status, "Ready to play again!");
    assert_eq!(snapshot.history.len(), 1);
    assert_eq!(snapshot.history[0].result, GameOutcome::Win);
}

#[tokio::test]
async fn handle__failed_play_refreshes_history_exactly_once() {
    // given
    let wallet = FakeWallet::with_accounts(vec![account(1)]);
    let ledger = FakeLedger::default();
    ledger.fail_submit(GameError::SubmissionRejected("execution reverted".into()));
    let mut engine = connected(&wallet, &ledger).await;

    // when
    engine.handle(Command::Play(2)).await;
    settle(&mut engine).await;

    // then
    let snapshot = engine.snapshot();
    assert_eq!(ledger.history_calls(&account(1)), 2);
    assert!(snapshot.state.is_idle());
    assert!(snapshot.status.contains("submission rejected"));
    assert!(snapshot.history.is_empty());
}

#[tokio::test]
async fn handle__second_play_while_pending_is_rejected_as_busy() {
    // given
    let wallet = FakeWallet::with_accounts(vec![account(1)]);
    let ledger = FakeLedger::default();
    let mut engine = connected(&wallet, &ledger).await;
    ledger.hold_confirmations();
    engine.handle(Command::Play(1)).await;
    engine.step().await;
    assert_eq!(engine.snapshot().state, SessionState::Submitted);

    // when
    engine.handle(Command::Play(2)).await;

    // then
    assert_eq!(ledger.submit_calls(), 1);
    assert_eq!(engine.snapshot().state, SessionState::Submitted);
    assert!(engine.snapshot().is_busy());

    ledger.release_confirmation();
    settle(&mut engine).await;
    assert_eq!(engine.snapshot().history.len(), 1);
    assert_eq!(ledger.submit_calls(), 1);
}

#[tokio::test]
async fn step__account_switch_mid_play_discards_the_old_result() {
    // given
    let wallet = FakeWallet::with_accounts(vec![account(1), account(2)]);
    let ledger = FakeLedger::default();
    ledger.seed_history(account(1), vec![raw_record(account(1), "WIN", 1, 3, 10)]);
    let mut engine = connected(&wallet, &ledger).await;
    ledger.hold_confirmations();
    engine.handle(Command::Play(2)).await;
    engine.step().await;

    // when
    wallet.switch_to(Some(account(2)));
    engine.step().await;

    // then
    let snapshot = engine.subscribe().borrow().clone();
    assert_eq!(snapshot.account, Some(account(2)));
    assert!(snapshot.history.is_empty());
    assert!(snapshot.state.is_idle());

    engine.handle(Command::Play(1)).await;
    assert_eq!(ledger.submit_calls(), 1);

    ledger.release_confirmation();
    settle(&mut engine).await;
    let snapshot = engine.snapshot();
    assert_eq!(snapshot.account, Some(account(2)));
    assert!(snapshot.history.is_empty());
    assert!(snapshot.state.is_idle());
    assert_eq!(ledger.history_calls(&account(1)), 1);
    assert_eq!(ledger.history_calls(&account(2)), 1);
}

#[tokio::test]
async fn step__play_is_allowed_again_once_orphaned_play_resolves() {
    // given
    let wallet = FakeWallet::with_accounts(vec![account(1), account(2)]);
    let ledger = FakeLedger::default();
    let mut engine = connected(&wallet, &ledger).await;
    ledger.hold_confirmations();
    engine.handle(Command::Play(2)).await;
    engine.step().await;
    wallet.switch_to(Some(account(2)));
    engine.step().await;
    ledger.release_confirmation();
    settle(&mut engine).await;

    // when
    ledger.release_confirmation();
    engine.handle(Command::Play(3)).await;
    settle(&mut engine).await;

    // then
    let snapshot = engine.snapshot();
    assert_eq!(ledger.submit_calls(), 2);
    assert_eq!(snapshot.history.len(), 1);
    assert_eq!(snapshot.history[0].record.player, account(2));
}

#[tokio::test]
async fn step__returning_to_account_with_pending_play_waits_for_it_before_fetching() {
    // given
    let wallet = FakeWallet::with_accounts(vec![account(1), account(2)]);
    let ledger = FakeLedger::default();
    let mut engine = connected(&wallet, &ledger).await;
    ledger.hold_confirmations();
    engine.handle(Command::Play(1)).await;
    engine.step().await;
    wallet.switch_to(Some(account(2)));
    engine.step().await;

    // when
    wallet.switch_to(Some(account(1)));
    while engine.snapshot().account != Some(account(1)) {
        engine.step().await;
    }

    // then
    let snapshot = engine.snapshot();
    assert_eq!(ledger.history_calls(&account(1)), 1);
    assert!(snapshot.history.is_empty());
    assert_eq!(snapshot.status, "Previous game still settling...");

    ledger.release_confirmation();
    settle(&mut engine).await;
    let snapshot = engine.snapshot();
    assert_eq!(ledger.history_calls(&account(1)), 2);
    assert_eq!(snapshot.account, Some(account(1)));
    assert_eq!(snapshot.history.len(), 1);
    assert_eq!(snapshot.history[0].record.player, account(1));
    assert!(snapshot.state.is_idle());
}

#[tokio::test]
async fn step__each_account_switch_clears_history_before_the_new_fetch() {
    // given
    let wallet = FakeWallet::with_accounts(vec![account(1), account(2)]);
    let ledger = FakeLedger::default();
    ledger.seed_history(account(1), vec![raw_record(account(1), "WIN", 1, 3, 10)]);
    ledger.seed_history(
        account(2),
        vec![
            raw_record(account(2), "LOSE", 2, 3, 20),
            raw_record(account(2), "DRAW", 3, 3, 30),
        ],
    );
    let mut engine = connected(&wallet, &ledger).await;
    let switches = [
        (Some(account(2)), 2),
        (Some(account(1)), 1),
        (None, 0),
        (Some(account(2)), 2),
    ];

    for (next, expected_len) in switches {
        // when
        wallet.switch_to(next);
        engine.step().await;

        // then
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.account, next);
        assert!(snapshot.history.is_empty());

        settle(&mut engine).await;
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.history.len(), expected_len);
        assert!(
            snapshot
                .history
                .iter()
                .all(|entry| Some(entry.record.player) == next)
        );
    }
}

#[tokio::test]
async fn handle__refresh_shows_latest_game_first() {
    // given
    let wallet = FakeWallet::with_accounts(vec![account(1)]);
    let ledger = FakeLedger::default();
    let mut engine = connected(&wallet, &ledger).await;
    ledger.seed_history(
        account(1),
        vec![
            raw_record(account(1), "WIN", 1, 3, 10),
            raw_record(account(1), "LOSE", 1, 2, 20),
            raw_record(account(1), "DRAW", 1, 1, 30),
        ],
    );

    // when
    engine.handle(Command::Refresh).await;
    settle(&mut engine).await;

    // then
    assert_eq!(timestamps(&engine.snapshot()), vec![30, 20, 10]);
}

#[tokio::test]
async fn handle__failed_refresh_keeps_entries_and_marks_them_stale() {
    // given
    let wallet = FakeWallet::with_accounts(vec![account(1)]);
    let ledger = FakeLedger::default();
    ledger.seed_history(
        account(1),
        vec![
            raw_record(account(1), "WIN", 1, 3, 10),
            raw_record(account(1), "LOSE", 1, 2, 20),
        ],
    );
    let mut engine = connected(&wallet, &ledger).await;
    ledger.fail_next_history(GameError::network("connection reset"));

    // when
    engine.handle(Command::Refresh).await;
    settle(&mut engine).await;

    // then
    let snapshot = engine.snapshot();
    assert_eq!(timestamps(&snapshot), vec![20, 10]);
    assert!(snapshot.history_stale);
}

#[tokio::test]
async fn handle__refresh_is_skipped_while_play_is_pending() {
    // given
    let wallet = FakeWallet::with_accounts(vec![account(1)]);
    let ledger = FakeLedger::default();
    let mut engine = connected(&wallet, &ledger).await;
    ledger.hold_confirmations();
    engine.handle(Command::Play(1)).await;
    engine.step().await;

    // when
    engine.handle(Command::Refresh).await;

    // then
    assert_eq!(ledger.history_calls(&account(1)), 1);
    ledger.release_confirmation();
    settle(&mut engine).await;
    assert_eq!(ledger.history_calls(&account(1)), 2);
}

#[tokio::test]
async fn handle__foreign_records_are_not_displayed() {
    let wallet = FakeWallet::with_accounts(vec![account(1)]);
    let ledger = FakeLedger::default();
    ledger.seed_history(account(1), vec![raw_record(account(1), "WIN", 1, 3, 10)]);
    ledger.inject_foreign_record(account(1), raw_record(account(9), "LOSE", 2, 3, 11));

    let engine = connected(&wallet, &ledger).await;

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.history.len(), 1);
    assert_eq!(snapshot.history[0].record.player, account(1));
}

#[tokio::test]
async fn run__drives_commands_until_shutdown() {
    // given
    let wallet = FakeWallet::with_accounts(vec![account(1)]);
    let ledger = FakeLedger::default();
    ledger.seed_history(account(1), vec![raw_record(account(1), "LOSE", 2, 3, 10)]);
    ledger.script_outcome("WIN", 3);
    let engine = engine_for(Some(&wallet), &ledger);
    let mut snapshots = engine.subscribe();
    let (commands, rx) = mpsc::unbounded_channel();

    // when
    let driver = async move {
        commands.send(Command::Connect).unwrap();
        snapshots
            .wait_for(|s| s.account.is_some() && !s.history.is_empty())
            .await
            .unwrap();
        commands.send(Command::Play(1)).unwrap();
        snapshots
            .wait_for(|s| s.history.len() == 2 && s.state.is_idle())
            .await
            .unwrap();
        commands.send(Command::Shutdown).unwrap();
        snapshots.borrow().clone()
    };
    let ((), last) = tokio::join!(engine.run(rx), driver);

    // then
    assert_eq!(last.history[0].result, GameOutcome::Win);
    assert_eq!(last.history[1].result, GameOutcome::Lose);
    assert_eq!(ledger.submit_calls(), 1);
}
