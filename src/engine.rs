//! Event loop tying the identity tracker, the session controller and the
//! contract gateway together.
//!
//! Runs on a single thread. Each ledger call is spawned as its own task and
//! reports back over an unbounded channel, so the loop keeps servicing user
//! commands and wallet notifications while a play is confirming.

use crate::{
    error::Result,
    game::{
        Account,
        GameRecord,
    },
    gateway::{
        ContractGateway,
        PlayProgress,
    },
    history::HistoryEntry,
    identity::{
        IdentityTracker,
        WalletEnvironment,
    },
    ledger::Ledger,
    session::{
        GameSessionController,
        HistoryTicket,
        PlayTicket,
        SessionState,
    },
};
use tokio::sync::{
    mpsc,
    watch,
};
use tracing::{
    info,
    warn,
};

#[cfg(test)]
mod tests;

/// User intents accepted by the engine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Command {
    Connect,
    Play(u8),
    Refresh,
    Shutdown,
}

/// What the presentation layer renders.
#[derive(Clone, Debug)]
pub struct SessionSnapshot {
    pub account: Option<Account>,
    pub has_wallet: bool,
    pub state: SessionState,
    pub status: String,
    pub history: Vec<HistoryEntry>,
    pub history_stale: bool,
}

impl SessionSnapshot {
    pub fn is_busy(&self) -> bool {
        !self.state.is_idle()
    }
}

enum EngineEvent {
    PlayProgress {
        epoch: u64,
        progress: PlayProgress,
    },
    PlayFinished {
        epoch: u64,
        outcome: Result<GameRecord>,
    },
    HistoryFetched {
        ticket: HistoryTicket,
        fetched: Result<Vec<GameRecord>>,
    },
}

enum Input {
    AccountChanged(Option<Account>),
    Engine(EngineEvent),
}

pub struct SessionEngine<W, L> {
    identity: IdentityTracker<W>,
    controller: GameSessionController,
    gateway: ContractGateway<L>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    events_rx: mpsc::UnboundedReceiver<EngineEvent>,
    snapshots: watch::Sender<SessionSnapshot>,
    outstanding: usize,
}

impl<W: WalletEnvironment, L: Ledger> SessionEngine<W, L> {
    pub fn new(identity: IdentityTracker<W>, gateway: ContractGateway<L>) -> Self {
        let controller = GameSessionController::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (snapshots, _) = watch::channel(build_snapshot(&identity, &controller));
        Self {
            identity,
            controller,
            gateway,
            events_tx,
            events_rx,
            snapshots,
            outstanding: 0,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        build_snapshot(&self.identity, &self.controller)
    }

    pub fn controller(&self) -> &GameSessionController {
        &self.controller
    }

    /// Ledger calls spawned but not yet reported back.
    pub fn in_flight(&self) -> usize {
        self.outstanding
    }

    /// Picks up an already-authorized account without prompting.
    pub async fn start(&mut self) {
        if let Some(account) = self.identity.probe_existing_session().await {
            info!(%account, "resuming authorized session");
            self.account_changed(Some(account));
        }
        self.publish();
    }

    /// Returns `false` once the engine should stop.
    pub async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Connect => {
                let before = self.identity.current().copied();
                match self.identity.request_connection().await {
                    Ok(account) if Some(account) != before => {
                        self.account_changed(Some(account))
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(%err, "wallet connection failed");
                        self.controller.connection_failed(&err);
                    }
                }
            }
            Command::Play(choice) => match self.controller.begin_play(choice) {
                Ok(ticket) => self.spawn_play(ticket),
                Err(err) => warn!(choice, %err, "play rejected"),
            },
            Command::Refresh => match self.controller.refresh_ticket() {
                Some(ticket) => self.spawn_fetch(ticket),
                None => info!("refresh skipped; no account or a play is pending"),
            },
            Command::Shutdown => return false,
        }
        self.publish();
        true
    }

    /// Waits for one wallet notification or task completion and applies it.
    pub async fn step(&mut self) {
        let input = tokio::select! {
            next = self.identity.next_change() => Input::AccountChanged(next),
            Some(event) = self.events_rx.recv() => Input::Engine(event),
        };
        self.apply(input);
        self.publish();
    }

    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        self.start().await;
        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    if !self.handle(command).await {
                        break;
                    }
                }
                _ = self.step() => {}
            }
        }
        if self.outstanding > 0 {
            warn!(outstanding = self.outstanding, "shutting down with ledger calls in flight");
        }
    }

    fn apply(&mut self, input: Input) {
        match input {
            Input::AccountChanged(next) => self.account_changed(next),
            Input::Engine(EngineEvent::PlayProgress { epoch, progress }) => {
                self.controller.play_progress(epoch, progress)
            }
            Input::Engine(EngineEvent::PlayFinished { epoch, outcome }) => {
                self.outstanding -= 1;
                if let Some(ticket) = self.controller.play_finished(epoch, outcome) {
                    self.spawn_fetch(ticket);
                }
            }
            Input::Engine(EngineEvent::HistoryFetched { ticket, fetched }) => {
                self.outstanding -= 1;
                self.controller.history_fetched(ticket, fetched);
            }
        }
    }

    fn account_changed(&mut self, next: Option<Account>) {
        if let Some(ticket) = self.controller.account_changed(next) {
            self.spawn_fetch(ticket);
        }
    }

    fn spawn_play(&mut self, ticket: PlayTicket) {
        let gateway = self.gateway.clone();
        let events = self.events_tx.clone();
        self.outstanding += 1;
        tokio::spawn(async move {
            let PlayTicket {
                epoch,
                account,
                choice,
            } = ticket;
            let progress_events = events.clone();
            let outcome = gateway
                .submit_choice(&account, choice.code(), move |progress| {
                    let _ = progress_events.send(EngineEvent::PlayProgress { epoch, progress });
                })
                .await;
            let _ = events.send(EngineEvent::PlayFinished { epoch, outcome });
        });
    }

    fn spawn_fetch(&mut self, ticket: HistoryTicket) {
        let gateway = self.gateway.clone();
        let events = self.events_tx.clone();
        self.outstanding += 1;
        tokio::spawn(async move {
            let fetched = gateway.fetch_history(&ticket.account).await;
            let _ = events.send(EngineEvent::HistoryFetched { ticket, fetched });
        });
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.snapshot());
    }
}

fn build_snapshot<W: WalletEnvironment>(
    identity: &IdentityTracker<W>,
    controller: &GameSessionController,
) -> SessionSnapshot {
    SessionSnapshot {
        account: controller.account().copied(),
        has_wallet: identity.has_wallet(),
        state: controller.state().clone(),
        status: controller.status(),
        history: controller.history().entries().to_vec(),
        history_stale: controller.history().is_stale(),
    }
}
