use crate::ui;
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use crypto_rps::{
    deployment::{
        DeploymentEnv,
        DeploymentStore,
        remember_contract,
        resolve_contract,
    },
    engine::{
        Command,
        SessionEngine,
    },
    gateway::ContractGateway,
    identity::IdentityTracker,
    ledger::{
        DEFAULT_CONTRACT_ADDRESS,
        EvmLedger,
    },
    wallets::{
        self,
        Keyring,
        KeystoreWallet,
    },
};
use ethers::types::Address;
use std::{
    fmt,
    path::PathBuf,
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{
    info,
    warn,
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt as tracing_fmt,
};

pub const DEFAULT_MAINNET_RPC_URL: &str = "https://ethereum-rpc.publicnode.com";
pub const DEFAULT_SEPOLIA_RPC_URL: &str = "https://ethereum-sepolia-rpc.publicnode.com";
pub const DEFAULT_LOCAL_RPC_URL: &str = "http://127.0.0.1:8545";

#[derive(Clone, Debug)]
pub enum NetworkTarget {
    Mainnet { url: String },
    Sepolia { url: String },
    LocalNode { url: String },
}

impl NetworkTarget {
    pub fn url(&self) -> &str {
        match self {
            NetworkTarget::Mainnet { url }
            | NetworkTarget::Sepolia { url }
            | NetworkTarget::LocalNode { url } => url,
        }
    }

    pub fn env(&self) -> DeploymentEnv {
        match self {
            NetworkTarget::Mainnet { .. } => DeploymentEnv::Mainnet,
            NetworkTarget::Sepolia { .. } => DeploymentEnv::Sepolia,
            NetworkTarget::LocalNode { .. } => DeploymentEnv::Local,
        }
    }
}

impl fmt::Display for NetworkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.env(), self.url())
    }
}

/// Keystore wallets to unlock at startup. No names means no wallet at all.
#[derive(Clone, Debug)]
pub struct WalletConfig {
    pub dir: PathBuf,
    pub names: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub network: NetworkTarget,
    pub contract: Option<Address>,
    pub wallets: WalletConfig,
    pub confirmations: usize,
    pub confirmation_timeout: Option<Duration>,
}

/// File logging only: the terminal belongs to the TUI. Keep the guard alive
/// for the whole run or buffered lines are lost.
pub fn init_tracing() -> WorkerGuard {
    let appender = rolling::daily("logs", "crypto-rps.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init();
    guard
}

pub async fn run_app(config: AppConfig) -> Result<()> {
    // Password prompts need the plain terminal, so unlock before the UI.
    let wallet = open_keystore(&config.wallets)?;
    let keyring = wallet
        .as_ref()
        .map(|w| w.keyring().clone())
        .unwrap_or_default();
    let ledger = connect_ledger(&config, keyring).await?;
    let gateway =
        ContractGateway::new(ledger).with_confirmation_timeout(config.confirmation_timeout);
    let engine = SessionEngine::new(IdentityTracker::new(wallet.clone()), gateway);

    let mut ui_state = ui::UiState::new(config.network.to_string());
    let mut input_events = ui::input_event_stream();

    tracing::info!("Starting UI");
    ui::terminal_enter(&mut ui_state)?;
    let res = run_loop(engine, wallet, &mut ui_state, &mut input_events).await;
    ui::terminal_exit()?;
    res
}

fn open_keystore(config: &WalletConfig) -> Result<Option<KeystoreWallet>> {
    if config.names.is_empty() {
        warn!("no wallet selected; running read-only without a wallet");
        return Ok(None);
    }
    let keyring = Keyring::default();
    for name in &config.names {
        let descriptor = wallets::find_wallet(&config.dir, name)?;
        if let Some(signer) = wallets::unlock_wallet(&descriptor)? {
            let account = keyring.insert(signer);
            info!(wallet = %name, %account, "wallet unlocked");
        }
    }
    Ok(Some(KeystoreWallet::new(keyring)))
}

async fn connect_ledger(config: &AppConfig, keyring: Keyring) -> Result<EvmLedger> {
    let store = DeploymentStore::new(config.network.env())?;
    let fallback: Address = DEFAULT_CONTRACT_ADDRESS
        .parse()
        .wrap_err("Built-in contract address is malformed")?;
    let contract = resolve_contract(&store, config.contract, fallback)?;
    let url = config.network.url();
    info!(network = %config.network, contract = %format!("{contract:#x}"), "connecting to ledger");
    let ledger = EvmLedger::connect(url, contract, keyring, config.confirmations)
        .await
        .wrap_err_with(|| format!("Failed to connect to {url}"))?;
    if config.contract.is_some() {
        remember_contract(&store, contract, url, ledger.chain_id())?;
    }
    Ok(ledger)
}

async fn run_loop<W, L>(
    engine: SessionEngine<W, L>,
    wallet: Option<KeystoreWallet>,
    ui_state: &mut ui::UiState,
    input_events: &mut ui::InputEventReceiver,
) -> Result<()>
where
    W: crypto_rps::identity::WalletEnvironment,
    L: crypto_rps::ledger::Ledger,
{
    tracing::info!("Running app loop");
    let mut snapshots = engine.subscribe();
    let (commands, command_rx) = mpsc::unbounded_channel();
    let engine_run = engine.run(command_rx);
    tokio::pin!(engine_run);
    let mut engine_stopped = false;

    let snapshot = snapshots.borrow_and_update().clone();
    ui::draw(ui_state, &snapshot).wrap_err("initial draw failed")?;

    loop {
        tokio::select! {
            _ = &mut engine_run, if !engine_stopped => {
                warn!("session engine stopped");
                engine_stopped = true;
                break;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                ui::draw(ui_state, &snapshot).wrap_err("draw after session update failed")?;
            }
            _ = tokio::signal::ctrl_c() => break,
            raw_ev = ui::next_raw_event(input_events) => {
                let event = raw_ev?;
                let Some(ev) = ui::interpret_event(ui_state, event) else {
                    continue;
                };
                match ev {
                    ui::UserEvent::Quit => break,
                    ui::UserEvent::Play(choice) => {
                        let _ = commands.send(Command::Play(choice));
                    }
                    ui::UserEvent::Connect => {
                        let _ = commands.send(Command::Connect);
                    }
                    ui::UserEvent::Refresh => {
                        let _ = commands.send(Command::Refresh);
                    }
                    ui::UserEvent::SwitchWallet => match &wallet {
                        Some(wallet) => {
                            if wallet.switch_next().is_none() {
                                ui_state.set_notice("Connect a wallet before switching accounts");
                            }
                        }
                        None => {
                            ui_state.set_notice("No wallet configured; start with --wallet <name>")
                        }
                    },
                    ui::UserEvent::Disconnect => {
                        if let Some(wallet) = &wallet {
                            wallet.disconnect();
                        }
                    }
                    ui::UserEvent::Redraw => {}
                }
                let snapshot = snapshots.borrow().clone();
                ui::draw(ui_state, &snapshot).wrap_err("draw after key press failed")?;
            }
        }
    }

    let _ = commands.send(Command::Shutdown);
    if !engine_stopped {
        engine_run.await;
    }
    Ok(())
}
