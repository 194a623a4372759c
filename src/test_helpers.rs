//! In-memory wallet and ledger doubles for exercising the session engine
//! without a node or keystore.

use crate::{
    error::{
        GameError,
        Result,
    },
    game::Account,
    identity::WalletEnvironment,
    ledger::{
        Confirmation,
        Ledger,
        RawGameRecord,
        SignedPlay,
    },
};
use ethers::types::{
    Address,
    Bytes,
    TxHash,
    U256,
};
use std::{
    collections::{
        HashMap,
        VecDeque,
    },
    sync::{
        Arc,
        Mutex,
    },
};
use tokio::sync::{
    Semaphore,
    mpsc,
};

pub fn account(n: u64) -> Account {
    Account::new(Address::from_low_u64_be(n))
}

pub fn raw_record(
    player: Account,
    result: &str,
    player_choice: u8,
    house_choice: u8,
    timestamp: u64,
) -> RawGameRecord {
    RawGameRecord {
        player: player.address(),
        result: result.to_string(),
        player_choice,
        house_choice,
        timestamp: U256::from(timestamp),
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LedgerCall {
    Authorize(Account, u8),
    Submit(Account),
    Confirm(TxHash),
    Outcome(Account),
    History(Account),
}

#[derive(Default)]
struct FakeLedgerState {
    calls: Vec<LedgerCall>,
    histories: HashMap<Account, Vec<RawGameRecord>>,
    foreign: HashMap<Account, Vec<RawGameRecord>>,
    pending: HashMap<TxHash, (Account, u8)>,
    outcomes: VecDeque<(String, u8)>,
    authorize_error: Option<GameError>,
    submit_error: Option<GameError>,
    confirm_error: Option<GameError>,
    history_errors: VecDeque<GameError>,
    next_tx: u64,
    clock: u64,
}

/// Scriptable [`Ledger`] that records every call.
///
/// Confirmations can be held open with [`FakeLedger::hold_confirmations`] and
/// released one at a time, which keeps a play in flight for as long as a test
/// needs.
#[derive(Clone)]
pub struct FakeLedger {
    state: Arc<Mutex<FakeLedgerState>>,
    gate: Arc<Mutex<Option<Arc<Semaphore>>>>,
}

impl Default for FakeLedger {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeLedgerState {
                clock: 1_700_000_000,
                ..Default::default()
            })),
            gate: Arc::new(Mutex::new(None)),
        }
    }
}

impl FakeLedger {
    pub fn script_outcome(&self, result: &str, house_choice: u8) {
        self.state
            .lock()
            .unwrap()
            .outcomes
            .push_back((result.to_string(), house_choice));
    }

    pub fn seed_history(&self, account: Account, records: Vec<RawGameRecord>) {
        self.state.lock().unwrap().histories.insert(account, records);
    }

    /// A record for another player that the ledger returns to `account`.
    pub fn inject_foreign_record(&self, account: Account, record: RawGameRecord) {
        self.state
            .lock()
            .unwrap()
            .foreign
            .entry(account)
            .or_default()
            .push(record);
    }

    pub fn fail_authorize(&self, err: GameError) {
        self.state.lock().unwrap().authorize_error = Some(err);
    }

    pub fn fail_submit(&self, err: GameError) {
        self.state.lock().unwrap().submit_error = Some(err);
    }

    pub fn fail_confirmation(&self, err: GameError) {
        self.state.lock().unwrap().confirm_error = Some(err);
    }

    pub fn fail_next_history(&self, err: GameError) {
        self.state.lock().unwrap().history_errors.push_back(err);
    }

    pub fn hold_confirmations(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_confirmation(&self) {
        if let Some(gate) = self.gate.lock().unwrap().as_ref() {
            gate.add_permits(1);
        }
    }

    pub fn calls(&self) -> Vec<LedgerCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn history_calls(&self, account: &Account) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, LedgerCall::History(a) if a == account))
            .count()
    }

    pub fn submit_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, LedgerCall::Submit(_)))
            .count()
    }
}

impl Ledger for FakeLedger {
    async fn authorize_play(&self, account: &Account, choice: u8) -> Result<SignedPlay> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(LedgerCall::Authorize(*account, choice));
        if let Some(err) = state.authorize_error.clone() {
            return Err(err);
        }
        Ok(SignedPlay {
            account: *account,
            choice,
            raw: Bytes::from(vec![choice]),
        })
    }

    async fn submit_play(&self, play: SignedPlay) -> Result<TxHash> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(LedgerCall::Submit(play.account));
        if let Some(err) = state.submit_error.clone() {
            return Err(err);
        }
        state.next_tx += 1;
        let tx_hash = TxHash::from_low_u64_be(state.next_tx);
        state.pending.insert(tx_hash, (play.account, play.choice));
        Ok(tx_hash)
    }

    async fn await_confirmation(&self, tx_hash: TxHash) -> Result<Confirmation> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(LedgerCall::Confirm(tx_hash));
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire()
                .await
                .map_err(|_| GameError::network("confirmation gate closed"))?
                .forget();
        }

        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.confirm_error.clone() {
            return Err(err);
        }
        let (account, choice) = state
            .pending
            .remove(&tx_hash)
            .ok_or_else(|| GameError::SubmissionRejected("unknown transaction".into()))?;
        let (result, house_choice) = state
            .outcomes
            .pop_front()
            .unwrap_or_else(|| ("DRAW".to_string(), choice));
        state.clock += 1;
        let record = raw_record(account, &result, choice, house_choice, state.clock);
        state.histories.entry(account).or_default().push(record);
        Ok(Confirmation {
            tx_hash,
            block_number: Some(state.clock),
        })
    }

    async fn outcome_of(
        &self,
        account: &Account,
        _confirmation: Confirmation,
    ) -> Result<RawGameRecord> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(LedgerCall::Outcome(*account));
        state
            .histories
            .get(account)
            .and_then(|games| games.last().cloned())
            .ok_or_else(|| GameError::network("no game recorded"))
    }

    async fn my_history(&self, account: &Account) -> Result<Vec<RawGameRecord>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(LedgerCall::History(*account));
        if let Some(err) = state.history_errors.pop_front() {
            return Err(err);
        }
        let mut records = state.histories.get(account).cloned().unwrap_or_default();
        records.extend(state.foreign.get(account).cloned().unwrap_or_default());
        Ok(records)
    }
}

#[derive(Default)]
struct FakeWalletState {
    unlocked: Vec<Account>,
    authorized: Vec<Account>,
    reject: bool,
    requests: usize,
    subscribers: Vec<mpsc::UnboundedSender<Vec<Account>>>,
}

/// Wallet environment double. Account switches are pushed to subscribers the
/// same way a browser wallet emits `accountsChanged`.
#[derive(Clone, Default)]
pub struct FakeWallet {
    state: Arc<Mutex<FakeWalletState>>,
}

impl FakeWallet {
    pub fn with_accounts(unlocked: Vec<Account>) -> Self {
        let wallet = Self::default();
        wallet.state.lock().unwrap().unlocked = unlocked;
        wallet
    }

    /// Pretend a previous visit already authorized `account`.
    pub fn pre_authorize(&self, account: Account) {
        self.state.lock().unwrap().authorized = vec![account];
    }

    pub fn reject_requests(&self) {
        self.state.lock().unwrap().reject = true;
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().unwrap().requests
    }

    /// Emit an account-change notification.
    pub fn switch_to(&self, next: Option<Account>) {
        let mut state = self.state.lock().unwrap();
        state.authorized = next.into_iter().collect();
        let accounts = state.authorized.clone();
        state
            .subscribers
            .retain(|tx| tx.send(accounts.clone()).is_ok());
    }
}

impl WalletEnvironment for FakeWallet {
    async fn list_authorized_accounts(&self) -> Result<Vec<Account>> {
        Ok(self.state.lock().unwrap().authorized.clone())
    }

    async fn request_authorization(&self) -> Result<Vec<Account>> {
        let mut state = self.state.lock().unwrap();
        state.requests += 1;
        if state.reject || state.unlocked.is_empty() {
            return Err(GameError::UserRejected("user declined".into()));
        }
        state.authorized = vec![state.unlocked[0]];
        Ok(state.authorized.clone())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<Vec<Account>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().unwrap().subscribers.push(tx);
        rx
    }
}
