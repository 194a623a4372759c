use color_eyre::eyre::{
    Result,
    eyre,
};
use crypto_rps::{
    deployment,
    wallets,
};
use std::{
    path::Path,
    time::Duration,
};

mod client;
mod ui;

fn print_usage_and_exit() -> ! {
    println!(
        "Usage: crypto-rps [--mainnet | --sepolia | --local] [--rpc-url <url>]\n\
         [--contract <address>] [--wallet <name>]... [--wallet-dir <path>]\n\
         [--confirmations <n>] [--confirmation-timeout <secs>]\n\
         \n\
         Flags:\n\
           --mainnet                     Connect to Ethereum mainnet (default RPC {})\n\
           --sepolia                     Connect to Sepolia (default RPC {})\n\
           --local                       Connect to a local node (default RPC {})\n\
           --rpc-url <url>               Override the RPC URL for the selected network\n\
           --contract <address>          Game contract address (remembered per network)\n\
           --wallet <name>               Keystore wallet to unlock; repeat for several\n\
           --wallet-dir <path>           Override keystore directory (defaults to ~/.ethereum/keystore)\n\
           --confirmations <n>           Blocks to wait for before reading the result (default 1)\n\
           --confirmation-timeout <secs> Give up waiting for confirmation after this long",
        client::DEFAULT_MAINNET_RPC_URL,
        client::DEFAULT_SEPOLIA_RPC_URL,
        client::DEFAULT_LOCAL_RPC_URL,
    );
    std::process::exit(0);
}

fn parse_cli_args() -> Result<client::AppConfig> {
    startup(std::env::args().skip(1), Path::new(deployment::DEPLOYMENTS_ROOT))
}

/// Arguments are validated before anything is written to disk.
fn startup(
    args: impl IntoIterator<Item = String>,
    deployments_root: &Path,
) -> Result<client::AppConfig> {
    let config = parse_args(args)?;
    deployment::ensure_structure(deployments_root)?;
    Ok(config)
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<client::AppConfig> {
    #[derive(Clone, Copy)]
    enum NetworkFlag {
        Mainnet,
        Sepolia,
        Local,
    }

    let mut args = args.into_iter();
    let mut network_flag: Option<NetworkFlag> = None;
    let mut custom_url: Option<String> = None;
    let mut contract: Option<String> = None;
    let mut wallet_dir: Option<String> = None;
    let mut wallet_names: Vec<String> = Vec::new();
    let mut confirmations: Option<usize> = None;
    let mut confirmation_timeout: Option<Duration> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--mainnet" | "--sepolia" | "--local" => {
                if network_flag.is_some() {
                    return Err(eyre!(
                        "Multiple network flags provided; choose one of --mainnet/--sepolia/--local"
                    ));
                }
                network_flag = Some(match arg.as_str() {
                    "--mainnet" => NetworkFlag::Mainnet,
                    "--sepolia" => NetworkFlag::Sepolia,
                    _ => NetworkFlag::Local,
                });
            }
            "--rpc-url" => {
                let url = args
                    .next()
                    .ok_or_else(|| eyre!("--rpc-url requires a URL argument"))?;
                if custom_url.is_some() {
                    return Err(eyre!("--rpc-url may only be specified once"));
                }
                if network_flag.is_none() {
                    return Err(eyre!(
                        "--rpc-url must follow a network flag (--mainnet/--sepolia/--local)"
                    ));
                }
                custom_url = Some(url);
            }
            "--contract" => {
                let address = args
                    .next()
                    .ok_or_else(|| eyre!("--contract requires an address argument"))?;
                if contract.is_some() {
                    return Err(eyre!("--contract may only be specified once"));
                }
                contract = Some(address);
            }
            "--wallet-dir" => {
                let dir = args
                    .next()
                    .ok_or_else(|| eyre!("--wallet-dir requires a path argument"))?;
                if wallet_dir.is_some() {
                    return Err(eyre!("--wallet-dir may only be specified once"));
                }
                wallet_dir = Some(dir);
            }
            "--wallet" => {
                let name = args
                    .next()
                    .ok_or_else(|| eyre!("--wallet requires a wallet name"))?;
                if !wallet_names.contains(&name) {
                    wallet_names.push(name);
                }
            }
            "--confirmations" => {
                let raw = args
                    .next()
                    .ok_or_else(|| eyre!("--confirmations requires a number"))?;
                let n: usize = raw
                    .parse()
                    .map_err(|_| eyre!("--confirmations expects a positive integer, got '{raw}'"))?;
                if n == 0 {
                    return Err(eyre!("--confirmations must be at least 1"));
                }
                confirmations = Some(n);
            }
            "--confirmation-timeout" => {
                let raw = args
                    .next()
                    .ok_or_else(|| eyre!("--confirmation-timeout requires a number of seconds"))?;
                let secs: u64 = raw.parse().map_err(|_| {
                    eyre!("--confirmation-timeout expects whole seconds, got '{raw}'")
                })?;
                confirmation_timeout = Some(Duration::from_secs(secs));
            }
            "--help" | "-h" => print_usage_and_exit(),
            other => return Err(eyre!("Unknown argument: {other}")),
        }
    }

    let network = match network_flag {
        None => {
            return Err(eyre!(
                "Select a network with --mainnet, --sepolia, or --local"
            ));
        }
        Some(NetworkFlag::Mainnet) => client::NetworkTarget::Mainnet {
            url: custom_url.unwrap_or_else(|| client::DEFAULT_MAINNET_RPC_URL.to_string()),
        },
        Some(NetworkFlag::Sepolia) => client::NetworkTarget::Sepolia {
            url: custom_url.unwrap_or_else(|| client::DEFAULT_SEPOLIA_RPC_URL.to_string()),
        },
        Some(NetworkFlag::Local) => client::NetworkTarget::LocalNode {
            url: custom_url.unwrap_or_else(|| client::DEFAULT_LOCAL_RPC_URL.to_string()),
        },
    };

    let contract = contract
        .map(|raw| {
            raw.parse()
                .map_err(|_| eyre!("--contract expects a 0x-prefixed address, got '{raw}'"))
        })
        .transpose()?;

    let dir = wallets::resolve_wallet_dir(wallet_dir.as_deref())?;

    Ok(client::AppConfig {
        network,
        contract,
        wallets: client::WalletConfig {
            dir,
            names: wallet_names,
        },
        confirmations: confirmations.unwrap_or(1),
        confirmation_timeout,
    })
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let _log_guard = client::init_tracing();
    tracing::info!("starting crypto-rps client");
    color_eyre::install()?;
    let app_config = parse_cli_args()?;
    client::run_app(app_config).await
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use tempdir::TempDir;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_args__requires_a_network() {
        let err = parse_args(args(&["--wallet", "alice"])).unwrap_err();
        assert!(err.to_string().contains("Select a network"));
    }

    #[test]
    fn parse_args__collects_repeated_wallets_and_overrides() {
        // given
        let argv = args(&[
            "--local",
            "--rpc-url",
            "http://node:8545",
            "--wallet",
            "alice",
            "--wallet",
            "bob",
            "--wallet",
            "alice",
            "--wallet-dir",
            "/tmp/keys",
            "--confirmations",
            "2",
            "--confirmation-timeout",
            "90",
        ]);

        // when
        let config = parse_args(argv).unwrap();

        // then
        assert_eq!(config.network.url(), "http://node:8545");
        assert_eq!(config.wallets.names, vec!["alice", "bob"]);
        assert_eq!(config.wallets.dir, Path::new("/tmp/keys"));
        assert_eq!(config.confirmations, 2);
        assert_eq!(config.confirmation_timeout, Some(Duration::from_secs(90)));
        assert_eq!(config.contract, None);
    }

    #[test]
    fn parse_args__rejects_rpc_url_before_network() {
        let err = parse_args(args(&["--rpc-url", "http://x", "--local"])).unwrap_err();
        assert!(err.to_string().contains("must follow a network flag"));
    }

    #[test]
    fn parse_args__rejects_malformed_contract_address() {
        let err = parse_args(args(&["--sepolia", "--contract", "0x12"])).unwrap_err();
        assert!(err.to_string().contains("--contract"));
    }

    #[test]
    fn parse_args__parses_contract_address() {
        let config = parse_args(args(&[
            "--sepolia",
            "--contract",
            "0xA8eA3CE1C94F15ad16b2E9082E437C9369F2D929",
        ]))
        .unwrap();
        assert!(config.contract.is_some());
        assert_eq!(config.network.url(), client::DEFAULT_SEPOLIA_RPC_URL);
    }

    #[test]
    fn startup__bad_flag_leaves_working_directory_untouched() {
        // given
        let dir = TempDir::new("startup").unwrap();
        let root = dir.path().join(".deployments");

        // when
        let result = startup(args(&["--local", "--bogus"]), &root);

        // then
        assert!(result.is_err());
        assert!(!root.exists());
    }

    #[test]
    fn startup__valid_flags_create_the_registry() {
        let dir = TempDir::new("startup").unwrap();
        let root = dir.path().join(".deployments");

        startup(args(&["--local", "--wallet-dir", "/tmp/keys"]), &root).unwrap();

        assert!(root.join("local").exists());
    }
}
