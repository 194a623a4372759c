use chrono::Utc;
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use ethers::types::Address;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    fs,
    io::Write,
    path::{
        Path,
        PathBuf,
    },
};
use tracing::info;

pub const DEPLOYMENTS_ROOT: &str = ".deployments";
const DEPLOYMENTS_FILE: &str = "deployments.json";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeploymentEnv {
    Mainnet,
    Sepolia,
    Local,
}

impl DeploymentEnv {
    pub const ALL: [DeploymentEnv; 3] = [
        DeploymentEnv::Mainnet,
        DeploymentEnv::Sepolia,
        DeploymentEnv::Local,
    ];

    pub fn dir_name(self) -> &'static str {
        match self {
            DeploymentEnv::Mainnet => "mainnet",
            DeploymentEnv::Sepolia => "sepolia",
            DeploymentEnv::Local => "local",
        }
    }
}

impl fmt::Display for DeploymentEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeploymentEnv::Mainnet => "Mainnet",
            DeploymentEnv::Sepolia => "Sepolia",
            DeploymentEnv::Local => "Local",
        };
        write!(f, "{name}")
    }
}

/// One known deployment of the game contract.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub deployed_at: String,
    pub contract_address: String,
    pub network_url: String,
    #[serde(default)]
    pub chain_id: Option<u64>,
}

impl DeploymentRecord {
    pub fn new(contract: Address, network_url: impl Into<String>, chain_id: Option<u64>) -> Self {
        Self {
            deployed_at: Utc::now().to_rfc3339(),
            contract_address: format!("{contract:#x}"),
            network_url: network_url.into(),
            chain_id,
        }
    }

    pub fn address(&self) -> Result<Address> {
        self.contract_address.parse().map_err(|_| {
            eyre!(
                "Invalid contract address '{}' in deployment record",
                self.contract_address
            )
        })
    }
}

/// Per-network list of deployments; the last record is the current one.
#[derive(Debug)]
pub struct DeploymentStore {
    path: PathBuf,
}

impl DeploymentStore {
    pub fn new(env: DeploymentEnv) -> Result<Self> {
        Self::open(Path::new(DEPLOYMENTS_ROOT), env)
    }

    pub fn open(root: &Path, env: DeploymentEnv) -> Result<Self> {
        let path = ensure_store(root, env)?;
        Ok(Self { path })
    }

    pub fn load(&self) -> Result<Vec<DeploymentRecord>> {
        read_records(&self.path)
    }

    pub fn latest(&self) -> Result<Option<DeploymentRecord>> {
        Ok(self.load()?.pop())
    }

    pub fn append(&self, record: DeploymentRecord) -> Result<()> {
        let mut records = self.load()?;
        records.push(record);
        write_records(&self.path, &records)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Picks the contract to talk to: an explicit address first, then the
/// latest registry record, then `fallback`.
pub fn resolve_contract(
    store: &DeploymentStore,
    explicit: Option<Address>,
    fallback: Address,
) -> Result<Address> {
    if let Some(address) = explicit {
        return Ok(address);
    }
    let latest = store.latest()?.map(|record| record.address()).transpose()?;
    Ok(latest.unwrap_or(fallback))
}

/// Appends `contract` unless it already is the latest record. Returns whether
/// a record was written.
pub fn remember_contract(
    store: &DeploymentStore,
    contract: Address,
    network_url: &str,
    chain_id: u64,
) -> Result<bool> {
    let latest = store.latest()?.map(|record| record.address()).transpose()?;
    if latest == Some(contract) {
        return Ok(false);
    }
    info!(contract = %format!("{contract:#x}"), path = ?store.path(), "recording contract address");
    store.append(DeploymentRecord::new(contract, network_url, Some(chain_id)))?;
    Ok(true)
}

pub fn ensure_structure(root: &Path) -> Result<()> {
    for env in DeploymentEnv::ALL {
        let _ = ensure_store(root, env)?;
    }
    Ok(())
}

fn ensure_store(root: &Path, env: DeploymentEnv) -> Result<PathBuf> {
    if !root.exists() {
        fs::create_dir_all(root).wrap_err("Failed to create .deployments directory")?;
    }

    let env_dir = root.join(env.dir_name());
    if !env_dir.exists() {
        fs::create_dir_all(&env_dir).wrap_err_with(|| {
            format!("Failed to create .deployments/{} directory", env.dir_name())
        })?;
    }

    let file_path = env_dir.join(DEPLOYMENTS_FILE);
    if !file_path.exists() {
        let mut file = fs::File::create(&file_path).wrap_err_with(|| {
            format!(
                "Failed to create deployment record file for {} at {:?}",
                env, file_path
            )
        })?;
        file.write_all(b"[]").wrap_err_with(|| {
            format!("Failed to initialize deployment record file for {}", env)
        })?;
    }

    Ok(file_path)
}

fn read_records(path: impl AsRef<Path>) -> Result<Vec<DeploymentRecord>> {
    let data = fs::read(path.as_ref()).wrap_err("Failed to read deployment records")?;
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let records = serde_json::from_slice::<Vec<DeploymentRecord>>(&data)
        .wrap_err("Failed to parse deployment records JSON")?;
    Ok(records)
}

fn write_records(path: impl AsRef<Path>, records: &[DeploymentRecord]) -> Result<()> {
    let json = serde_json::to_vec_pretty(records)
        .wrap_err("Failed to serialize deployment records")?;
    fs::write(path.as_ref(), json).wrap_err("Failed to write deployment records")?;
    Ok(())
}
