use crate::{
    error::{
        GameError,
        Result,
    },
    game::{
        Account,
        Choice,
        GameOutcome,
        GameRecord,
    },
    ledger::{
        Ledger,
        RawGameRecord,
    },
};
use ethers::types::{
    Address,
    TxHash,
    U256,
};
use rand::{
    Rng,
    RngCore,
};
use std::time::Duration;
use tokio::time;
use tracing::{
    info,
    warn,
};

const DEFAULT_READ_ATTEMPTS: u32 = 3;
const DEFAULT_READ_BACKOFF: Duration = Duration::from_millis(250);

/// Milestones of an in-flight `play`, reported while `submit_choice` runs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PlayProgress {
    /// Signed and accepted by the node.
    Submitted(TxHash),
    /// Mined; the outcome is being read back.
    Confirmed(Option<u64>),
}

/// Stateless adapter over a [`Ledger`].
///
/// Validates inputs before touching the ledger, sequences the two phases of a
/// play, and normalizes raw contract tuples into [`GameRecord`]s scoped to the
/// requesting account.
#[derive(Clone, Debug)]
pub struct ContractGateway<L> {
    ledger: L,
    confirmation_timeout: Option<Duration>,
    read_attempts: u32,
    read_backoff: Duration,
}

impl<L> ContractGateway<L> {
    pub fn new(ledger: L) -> Self {
        Self {
            ledger,
            confirmation_timeout: None,
            read_attempts: DEFAULT_READ_ATTEMPTS,
            read_backoff: DEFAULT_READ_BACKOFF,
        }
    }

    pub fn with_confirmation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    /// `attempts` includes the first try; zero is treated as one.
    pub fn with_read_retries(mut self, attempts: u32, backoff: Duration) -> Self {
        self.read_attempts = attempts.max(1);
        self.read_backoff = backoff;
        self
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }
}

impl<L: Ledger> ContractGateway<L> {
    /// Plays `choice` for `account` and returns the confirmed game.
    ///
    /// Not idempotent: a retry after an ambiguous failure may create a second
    /// game. Callers must check history before retrying.
    pub async fn submit_choice(
        &self,
        account: &Account,
        choice: u8,
        on_progress: impl Fn(PlayProgress) + Send,
    ) -> Result<GameRecord> {
        let choice = Choice::try_from(choice)?;
        if account.address() == Address::zero() {
            return Err(GameError::InvalidInput(
                "cannot play from the zero address".to_string(),
            ));
        }

        let signed = self.ledger.authorize_play(account, choice.code()).await?;
        let tx_hash = self.ledger.submit_play(signed).await?;
        info!(%account, %choice, tx_hash = %format!("{tx_hash:#x}"), "play submitted");
        on_progress(PlayProgress::Submitted(tx_hash));

        let confirmation = match self.confirmation_timeout {
            Some(limit) => time::timeout(limit, self.ledger.await_confirmation(tx_hash))
                .await
                .map_err(|_| GameError::ConfirmationTimeout(limit))??,
            None => self.ledger.await_confirmation(tx_hash).await?,
        };
        on_progress(PlayProgress::Confirmed(confirmation.block_number));

        let raw = self.ledger.outcome_of(account, confirmation).await?;
        if raw.player != account.address() {
            return Err(GameError::NetworkError(format!(
                "ledger returned a game for {:#x} while confirming {account}",
                raw.player
            )));
        }
        Ok(to_record(raw))
    }

    /// Read-only. Retries transient failures with jittered backoff.
    pub async fn fetch_history(&self, account: &Account) -> Result<Vec<GameRecord>> {
        let mut backoff = self.read_backoff;
        let mut attempt = 1;
        loop {
            match self.ledger.my_history(account).await {
                Ok(raw) => return Ok(scope_to_account(account, raw)),
                Err(err) if err.is_transient() && attempt < self.read_attempts => {
                    let delay = jittered_backoff(&mut rand::rng(), backoff);
                    warn!(%account, attempt, ?delay, %err, "history fetch failed, retrying");
                    time::sleep(delay).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Drops records that belong to a different player. The contract read is
/// caller-scoped, but a record for another account must never reach the view.
fn scope_to_account(account: &Account, raw: Vec<RawGameRecord>) -> Vec<GameRecord> {
    let total = raw.len();
    let scoped: Vec<_> = raw
        .into_iter()
        .filter(|record| record.player == account.address())
        .map(to_record)
        .collect();
    if scoped.len() != total {
        warn!(
            %account,
            foreign = total - scoped.len(),
            "ledger history contained records for other players; dropped"
        );
    }
    scoped
}

fn to_record(raw: RawGameRecord) -> GameRecord {
    let timestamp = if raw.timestamp > U256::from(u64::MAX) {
        u64::MAX
    } else {
        raw.timestamp.as_u64()
    };
    GameRecord {
        player: Account::new(raw.player),
        result: GameOutcome::parse(&raw.result),
        player_choice: raw.player_choice,
        house_choice: raw.house_choice,
        timestamp,
    }
}

/// Delay in `[backoff/2, backoff]`.
fn jittered_backoff(rng: &mut impl RngCore, backoff: Duration) -> Duration {
    let backoff_ms = backoff.as_millis() as u64;
    if backoff_ms <= 1 {
        return backoff;
    }
    let half_ms = backoff_ms / 2;
    let jitter_ms = rng.random_range(0..=half_ms);
    Duration::from_millis(half_ms.saturating_add(jitter_ms))
}
