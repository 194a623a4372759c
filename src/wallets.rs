//! Keystore-backed wallet environment.
//!
//! Wallets are Web3 secret-storage files (the format geth and most CLI
//! tooling write to `~/.ethereum/keystore`). They are unlocked once at
//! startup; after that the environment behaves like an injected browser
//! wallet: the user authorizes an account, may switch between unlocked
//! accounts and may disconnect, and every change is pushed to subscribers.

use crate::{
    error::{
        GameError,
        Result as GameResult,
    },
    game::Account,
    identity::WalletEnvironment,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use eth_keystore::decrypt_key;
use ethers::signers::{
    LocalWallet,
    MnemonicBuilder,
    Signer,
    coins_bip39::English,
};
use rpassword::prompt_password;
use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
    sync::{
        Arc,
        Mutex,
        PoisonError,
        RwLock,
    },
};
use tokio::sync::mpsc;
use tracing::{
    info,
    warn,
};

#[derive(Clone, Debug)]
pub struct WalletDescriptor {
    pub name: String,
    pub path: PathBuf,
}

impl WalletDescriptor {
    pub fn new(name: impl Into<String>, path: PathBuf) -> Self {
        Self {
            name: name.into(),
            path,
        }
    }
}

pub fn default_wallet_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").wrap_err("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".ethereum").join("keystore"))
}

pub fn resolve_wallet_dir(dir: Option<&str>) -> Result<PathBuf> {
    match dir {
        Some(raw) => {
            let expanded = shellexpand::tilde(raw);
            Ok(PathBuf::from(expanded.into_owned()))
        }
        None => default_wallet_dir(),
    }
}

/// Every regular, non-hidden file in `dir`, named after its file name minus
/// an optional `.json` extension.
pub fn list_wallets(dir: &Path) -> Result<Vec<WalletDescriptor>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut wallets = Vec::new();
    for entry in fs::read_dir(dir).wrap_err("Failed to read keystore directory")? {
        let entry = entry.wrap_err("Failed to read keystore entry")?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| eyre!("Invalid keystore filename {:?}", path))?;
        if file_name.starts_with('.') {
            continue;
        }
        let name = file_name.strip_suffix(".json").unwrap_or(file_name).to_owned();
        wallets.push(WalletDescriptor::new(name, path));
    }
    wallets.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(wallets)
}

pub fn find_wallet(dir: &Path, name: &str) -> Result<WalletDescriptor> {
    let wallets = list_wallets(dir)?;
    wallets
        .into_iter()
        .find(|w| w.name == name)
        .ok_or_else(|| eyre!("Wallet '{name}' not found in {}", dir.to_string_lossy()))
}

/// Prompts for the keystore password. An empty password skips the wallet,
/// which leaves it locked for the rest of the session.
pub fn unlock_wallet(descriptor: &WalletDescriptor) -> Result<Option<LocalWallet>> {
    let prompt = format!(
        "Enter password for wallet '{}' (empty to skip): ",
        descriptor.name
    );
    let password = prompt_password(prompt).wrap_err("Failed to read wallet password")?;
    if password.is_empty() {
        info!(wallet = %descriptor.name, "wallet left locked");
        return Ok(None);
    }
    decrypt_wallet(descriptor, &password).map(Some)
}

pub fn decrypt_wallet(descriptor: &WalletDescriptor, password: &str) -> Result<LocalWallet> {
    let secret = decrypt_key(&descriptor.path, password.as_bytes())
        .map_err(|_| eyre!("Invalid password for wallet '{}'", descriptor.name))?;

    if let Ok(wallet) = LocalWallet::from_bytes(&secret) {
        return Ok(wallet);
    }

    if let Ok(mnemonic) = std::str::from_utf8(&secret) {
        let word_count = mnemonic.split_whitespace().count();
        if word_count >= 12 {
            return MnemonicBuilder::<English>::default()
                .phrase(mnemonic.trim())
                .build()
                .wrap_err_with(|| {
                    format!("Invalid mnemonic in wallet '{}'", descriptor.name)
                });
        }
    }

    Err(eyre!(
        "Wallet '{}' contained unsupported key material",
        descriptor.name
    ))
}

/// Unlocked signing keys, shared between the wallet environment and the
/// ledger that signs with them.
#[derive(Clone, Default)]
pub struct Keyring {
    signers: Arc<RwLock<Vec<(Account, LocalWallet)>>>,
}

impl Keyring {
    /// Adds `wallet` unless its address is already present.
    pub fn insert(&self, wallet: LocalWallet) -> Account {
        let account = Account::new(wallet.address());
        let mut signers = self.signers.write().unwrap_or_else(PoisonError::into_inner);
        if !signers.iter().any(|(known, _)| *known == account) {
            signers.push((account, wallet));
        }
        account
    }

    pub fn signer(&self, account: &Account) -> Option<LocalWallet> {
        self.signers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(known, _)| known == account)
            .map(|(_, wallet)| wallet.clone())
    }

    /// Unlocked accounts in insertion order.
    pub fn accounts(&self) -> Vec<Account> {
        self.signers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(account, _)| *account)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts().is_empty()
    }
}

#[derive(Default)]
struct KeystoreState {
    authorized: Option<Account>,
    subscribers: Vec<mpsc::UnboundedSender<Vec<Account>>>,
}

impl KeystoreState {
    fn authorized_accounts(&self) -> Vec<Account> {
        self.authorized.into_iter().collect()
    }

    fn notify(&mut self) {
        let accounts = self.authorized_accounts();
        self.subscribers
            .retain(|tx| tx.send(accounts.clone()).is_ok());
    }
}

/// [`WalletEnvironment`] over a [`Keyring`]. Cloned handles share state, so
/// the presentation layer can switch accounts while the engine listens.
#[derive(Clone, Default)]
pub struct KeystoreWallet {
    keyring: Keyring,
    state: Arc<Mutex<KeystoreState>>,
}

impl KeystoreWallet {
    pub fn new(keyring: Keyring) -> Self {
        Self {
            keyring,
            state: Arc::default(),
        }
    }

    pub fn keyring(&self) -> &Keyring {
        &self.keyring
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, KeystoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves the authorization to the next unlocked account. Does nothing
    /// until an account has been authorized.
    pub fn switch_next(&self) -> Option<Account> {
        let accounts = self.keyring.accounts();
        let mut state = self.lock();
        let current = state.authorized?;
        let position = accounts.iter().position(|a| *a == current).unwrap_or(0);
        let next = *accounts.get((position + 1) % accounts.len().max(1))?;
        if next != current {
            info!(from = %current, to = %next, "switching wallet account");
            state.authorized = Some(next);
            state.notify();
        }
        Some(next)
    }

    pub fn disconnect(&self) {
        let mut state = self.lock();
        if state.authorized.take().is_some() {
            info!("wallet disconnected");
            state.notify();
        }
    }
}

impl WalletEnvironment for KeystoreWallet {
    async fn list_authorized_accounts(&self) -> GameResult<Vec<Account>> {
        Ok(self.lock().authorized_accounts())
    }

    async fn request_authorization(&self) -> GameResult<Vec<Account>> {
        let Some(first) = self.keyring.accounts().first().copied() else {
            warn!("authorization requested with no unlocked keystore");
            return Err(GameError::UserRejected(
                "no unlocked keystore wallet to authorize".to_string(),
            ));
        };
        let mut state = self.lock();
        let account = *state.authorized.get_or_insert(first);
        Ok(vec![account])
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<Vec<Account>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.push(tx);
        rx
    }
}
