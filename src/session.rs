//! Lifecycle of the single in-flight play.
//!
//! ```text
//! Idle -> AwaitingSignature -> Submitted -> Confirming -> Succeeded -+
//!               |                  |            |                    +-> (history refresh) -> Idle
//!               +------------------+------------+------> Failed -----+
//! ```
//!
//! The controller is synchronous. Every asynchronous request it hands out
//! carries the account epoch it was issued under, and completions from an
//! older epoch are discarded.

use crate::{
    error::{
        GameError,
        Result,
    },
    game::{
        Account,
        Choice,
        GameRecord,
    },
    gateway::PlayProgress,
    history::HistoryView,
};
use tracing::{
    debug,
    error,
    info,
};

pub const CONNECT_PROMPT: &str = "Please connect your wallet first!";

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum SessionState {
    #[default]
    Idle,
    AwaitingSignature,
    Submitted,
    Confirming,
    Succeeded(GameRecord),
    Failed(GameError),
}

impl SessionState {
    pub fn is_idle(&self) -> bool {
        matches!(self, SessionState::Idle)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Succeeded(_) | SessionState::Failed(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "IDLE",
            SessionState::AwaitingSignature => "AWAITING_SIGNATURE",
            SessionState::Submitted => "SUBMITTED",
            SessionState::Confirming => "CONFIRMING",
            SessionState::Succeeded(_) => "SUCCEEDED",
            SessionState::Failed(_) => "FAILED",
        }
    }
}

/// Permission to run one `submit_choice` for `account`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PlayTicket {
    pub epoch: u64,
    pub account: Account,
    pub choice: Choice,
}

/// Permission to run one `fetch_history` for `account`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HistoryTicket {
    pub epoch: u64,
    pub account: Account,
}

/// A play whose account went away before it resolved.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct OrphanedPlay {
    epoch: u64,
    account: Account,
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum LastOutcome {
    Won(GameRecord),
    Failed(GameError),
}

#[derive(Debug, Default)]
pub struct GameSessionController {
    account: Option<Account>,
    epoch: u64,
    state: SessionState,
    history: HistoryView,
    last_outcome: Option<LastOutcome>,
    notice: Option<String>,
    orphaned_play: Option<OrphanedPlay>,
}

impl GameSessionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account(&self) -> Option<&Account> {
        self.account.as_ref()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn history(&self) -> &HistoryView {
        &self.history
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Cold start for `next`: the pending state and the history are dropped,
    /// and a fetch is requested when an account is present.
    ///
    /// Returning to the account of an orphaned play holds the fetch back until
    /// that play resolves, so the read cannot race its confirmation.
    pub fn account_changed(&mut self, next: Option<Account>) -> Option<HistoryTicket> {
        if !self.state.is_idle()
            && !self.state.is_terminal()
            && let Some(account) = self.account
        {
            info!(epoch = self.epoch, "account changed mid-play; result will be discarded");
            self.orphaned_play = Some(OrphanedPlay {
                epoch: self.epoch,
                account,
            });
        }
        self.epoch += 1;
        self.account = next;
        self.state = SessionState::Idle;
        self.last_outcome = None;
        self.notice = None;
        self.history.clear();
        let account = next?;
        if self.settling_for(&account) {
            info!(%account, "history fetch deferred until the previous game settles");
            return None;
        }
        Some(HistoryTicket {
            epoch: self.epoch,
            account,
        })
    }

    /// Guards and starts a play. Rejections happen here, before any wallet or
    /// ledger call.
    pub fn begin_play(&mut self, choice: u8) -> Result<PlayTicket> {
        if !self.state.is_idle() || self.orphaned_play.is_some() {
            return Err(GameError::SessionBusy);
        }
        let Some(account) = self.account else {
            self.notice = Some(CONNECT_PROMPT.to_string());
            return Err(GameError::InvalidInput(CONNECT_PROMPT.to_string()));
        };
        let choice = match Choice::try_from(choice) {
            Ok(choice) => choice,
            Err(err) => {
                self.notice = Some(format!("Move rejected: {err}"));
                return Err(err);
            }
        };
        self.notice = None;
        self.transition(SessionState::AwaitingSignature);
        Ok(PlayTicket {
            epoch: self.epoch,
            account,
            choice,
        })
    }

    pub fn play_progress(&mut self, epoch: u64, progress: PlayProgress) {
        if epoch != self.epoch {
            debug!(epoch, ?progress, "ignoring progress from a previous account");
            return;
        }
        let next = match (&self.state, progress) {
            (SessionState::AwaitingSignature, PlayProgress::Submitted(_)) => {
                SessionState::Submitted
            }
            (SessionState::Submitted, PlayProgress::Confirmed(_)) => SessionState::Confirming,
            (state, progress) => {
                debug!(state = state.name(), ?progress, "out-of-order progress ignored");
                return;
            }
        };
        self.transition(next);
    }

    /// Records the terminal outcome and requests the post-play refresh.
    pub fn play_finished(
        &mut self,
        epoch: u64,
        outcome: Result<GameRecord>,
    ) -> Option<HistoryTicket> {
        if epoch != self.epoch {
            debug!(epoch, "discarding play result from a previous account");
            let orphan = self.orphaned_play.take_if(|orphan| orphan.epoch == epoch)?;
            // Back on the orphan's account: its history was held back until now.
            let account = self.account.filter(|account| *account == orphan.account)?;
            return Some(HistoryTicket {
                epoch: self.epoch,
                account,
            });
        }
        let account = self.account?;
        match outcome {
            Ok(record) => {
                info!(%account, result = %record.result, "game confirmed");
                self.last_outcome = Some(LastOutcome::Won(record.clone()));
                self.transition(SessionState::Succeeded(record));
            }
            Err(err) => {
                error!(%account, %err, kind = %err.kind(), "game failed");
                self.last_outcome = Some(LastOutcome::Failed(err.clone()));
                self.transition(SessionState::Failed(err));
            }
        }
        Some(HistoryTicket {
            epoch: self.epoch,
            account,
        })
    }

    /// Applies a fetch result. Completes a terminal state back to `Idle`.
    pub fn history_fetched(
        &mut self,
        ticket: HistoryTicket,
        fetched: Result<Vec<GameRecord>>,
    ) {
        if ticket.epoch != self.epoch || Some(ticket.account) != self.account {
            debug!(epoch = ticket.epoch, account = %ticket.account, "discarding stale history");
            return;
        }
        self.history.apply(&ticket.account, fetched);
        if self.state.is_terminal() {
            self.transition(SessionState::Idle);
        }
    }

    /// A manual refresh. Refused while a play is pending so that reads never
    /// race a confirmation for the same account.
    pub fn refresh_ticket(&self) -> Option<HistoryTicket> {
        if !self.state.is_idle() {
            return None;
        }
        let account = self.account?;
        if self.settling_for(&account) {
            return None;
        }
        Some(HistoryTicket {
            epoch: self.epoch,
            account,
        })
    }

    /// Remembers a wallet-level failure (connect) for the status line.
    pub fn connection_failed(&mut self, err: &GameError) {
        self.notice = Some(match err {
            GameError::WalletUnavailable => {
                "No wallet found. Please install or configure a wallet!".to_string()
            }
            other => format!("Connection failed ({}): {other}", other.kind()),
        });
    }

    /// The one human-readable line describing where the session is.
    pub fn status(&self) -> String {
        match &self.state {
            SessionState::Idle => match (&self.notice, &self.last_outcome) {
                (Some(notice), _) => notice.clone(),
                (None, Some(LastOutcome::Won(_))) => "Ready to play again!".to_string(),
                (None, Some(LastOutcome::Failed(err))) => failure_line(err),
                (None, None) if self.orphaned_play.is_some() => {
                    "Previous game still settling...".to_string()
                }
                (None, None) => "Ready to play".to_string(),
            },
            SessionState::AwaitingSignature => "Signing transaction...".to_string(),
            SessionState::Submitted => {
                "Transaction sent. Waiting for confirmation...".to_string()
            }
            SessionState::Confirming => "Confirmed. Reading result...".to_string(),
            SessionState::Succeeded(record) => {
                format!("Game finished! You {}. Updating history...", record.result)
            }
            SessionState::Failed(err) => failure_line(err),
        }
    }

    fn settling_for(&self, account: &Account) -> bool {
        self.orphaned_play.is_some_and(|orphan| orphan.account == *account)
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = self.state.name(), to = next.name(), "session transition");
        self.state = next;
    }
}

fn failure_line(err: &GameError) -> String {
    format!("Transaction failed ({}): {err}", err.kind())
}
