use crate::{
    error::Result,
    game::{
        Account,
        Choice,
        GameOutcome,
        GameRecord,
    },
    gateway::ContractGateway,
    ledger::Ledger,
};
use chrono::{
    DateTime,
    Utc,
};
use tracing::{
    debug,
    warn,
};

/// A game decoded for display.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HistoryEntry {
    pub result: GameOutcome,
    /// `None` when the ledger stored a code outside `1..=3`.
    pub player_choice: Option<Choice>,
    pub house_choice: Option<Choice>,
    pub played_at: Option<DateTime<Utc>>,
    pub record: GameRecord,
}

impl From<GameRecord> for HistoryEntry {
    fn from(record: GameRecord) -> Self {
        Self {
            result: record.result.clone(),
            player_choice: Choice::decode(record.player_choice),
            house_choice: Choice::decode(record.house_choice),
            played_at: i64::try_from(record.timestamp)
                .ok()
                .and_then(|secs| DateTime::from_timestamp(secs, 0)),
            record,
        }
    }
}

/// Reverses the ledger's oldest-first order and decodes every record.
pub fn normalize(records: Vec<GameRecord>) -> Vec<HistoryEntry> {
    records.into_iter().rev().map(HistoryEntry::from).collect()
}

/// Display-ready history for the current account.
///
/// Always the normalized result of the last successful fetch; never edited
/// in place. A failed fetch keeps the entries and marks them stale.
#[derive(Clone, Debug, Default)]
pub struct HistoryView {
    account: Option<Account>,
    entries: Vec<HistoryEntry>,
    stale: bool,
}

impl HistoryView {
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn account(&self) -> Option<&Account> {
        self.account.as_ref()
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Unconditional wipe for an account change.
    pub fn clear(&mut self) {
        self.account = None;
        self.entries.clear();
        self.stale = false;
    }

    /// Applies the outcome of a fetch issued for `account`.
    pub fn apply(&mut self, account: &Account, fetched: Result<Vec<GameRecord>>) {
        match fetched {
            Ok(records) => {
                debug!(%account, games = records.len(), "history replaced");
                self.account = Some(*account);
                self.entries = normalize(records);
                self.stale = false;
            }
            Err(err) => {
                warn!(%account, %err, "history fetch failed; keeping previous entries");
                if self.account.is_some_and(|shown| shown != *account) {
                    self.entries.clear();
                    self.account = None;
                }
                self.stale = true;
            }
        }
    }

    pub async fn refresh<L: Ledger>(
        &mut self,
        gateway: &ContractGateway<L>,
        account: &Account,
    ) {
        let fetched = gateway.fetch_history(account).await;
        self.apply(account, fetched);
    }
}
