//! Raw contract boundary.
//!
//! [`Ledger`] mirrors the two-function contract interface at transport
//! level, with the mutating `play` split into its signing, broadcast and
//! confirmation phases. [`EvmLedger`] is the `ethers` implementation.

use crate::{
    error::{
        GameError,
        Result,
    },
    game::Account,
    wallets::Keyring,
};
use ethers::{
    prelude::abigen,
    providers::{
        Http,
        Middleware,
        PendingTransaction,
        Provider,
        ProviderError,
    },
    signers::Signer,
    types::{
        Address,
        BlockId,
        BlockNumber,
        Bytes,
        TxHash,
        U256,
        U64,
    },
};
use std::{
    future::Future,
    sync::Arc,
};
use tracing::debug;

abigen!(
    RockPaperScissors,
    r#"[
        {
            "type": "function",
            "name": "play",
            "stateMutability": "nonpayable",
            "inputs": [{ "name": "_myChoice", "type": "uint8" }],
            "outputs": [{ "name": "", "type": "string" }]
        },
        {
            "type": "function",
            "name": "getMyHistory",
            "stateMutability": "view",
            "inputs": [],
            "outputs": [
                {
                    "name": "",
                    "type": "tuple[]",
                    "components": [
                        { "name": "player", "type": "address" },
                        { "name": "result", "type": "string" },
                        { "name": "playerChoice", "type": "uint8" },
                        { "name": "houseChoice", "type": "uint8" },
                        { "name": "timestamp", "type": "uint256" }
                    ]
                }
            ]
        }
    ]"#
);

/// Default deployment used when no other address is configured.
pub const DEFAULT_CONTRACT_ADDRESS: &str = "0xA8eA3CE1C94F15ad16b2E9082E437C9369F2D929";

/// One element of `getMyHistory()` exactly as the contract encodes it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RawGameRecord {
    pub player: Address,
    pub result: String,
    pub player_choice: u8,
    pub house_choice: u8,
    pub timestamp: U256,
}

/// `getMyHistory()` element as decoded from the ABI.
type HistoryRow = (Address, String, u8, u8, U256);

impl From<HistoryRow> for RawGameRecord {
    fn from((player, result, player_choice, house_choice, timestamp): HistoryRow) -> Self {
        Self {
            player,
            result,
            player_choice,
            house_choice,
            timestamp,
        }
    }
}

/// A `play` transaction signed for a specific account, not yet broadcast.
#[derive(Clone, Debug)]
pub struct SignedPlay {
    pub account: Account,
    pub choice: u8,
    pub raw: Bytes,
}

/// Evidence that a submitted play was mined.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Confirmation {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
}

/// Ledger capability used by the contract gateway.
pub trait Ledger: Clone + Send + Sync + 'static {
    /// Phase one: obtain a signature for `play(choice)` bound to `account`.
    fn authorize_play(
        &self,
        account: &Account,
        choice: u8,
    ) -> impl Future<Output = Result<SignedPlay>> + Send;

    /// Phase two: broadcast. Irrevocable once accepted.
    fn submit_play(&self, play: SignedPlay) -> impl Future<Output = Result<TxHash>> + Send;

    fn await_confirmation(
        &self,
        tx_hash: TxHash,
    ) -> impl Future<Output = Result<Confirmation>> + Send;

    /// The game produced by a confirmed play.
    fn outcome_of(
        &self,
        account: &Account,
        confirmation: Confirmation,
    ) -> impl Future<Output = Result<RawGameRecord>> + Send;

    /// `getMyHistory()` as seen by `account`, oldest first.
    fn my_history(
        &self,
        account: &Account,
    ) -> impl Future<Output = Result<Vec<RawGameRecord>>> + Send;
}

#[derive(Clone)]
pub struct EvmLedger {
    provider: Arc<Provider<Http>>,
    contract: RockPaperScissors<Provider<Http>>,
    keyring: Keyring,
    chain_id: u64,
    confirmations: usize,
}

impl EvmLedger {
    pub async fn connect(
        rpc_url: &str,
        contract: Address,
        keyring: Keyring,
        confirmations: usize,
    ) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| GameError::NetworkError(format!("invalid RPC URL {rpc_url}: {e}")))?;
        let chain_id = provider
            .get_chainid()
            .await
            .map_err(classify_provider_error)?
            .as_u64();
        let provider = Arc::new(provider);
        let contract = RockPaperScissors::new(contract, provider.clone());
        Ok(Self {
            provider,
            contract,
            keyring,
            chain_id,
            confirmations: confirmations.max(1),
        })
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn history_at(
        &self,
        account: &Account,
        block: Option<u64>,
    ) -> Result<Vec<RawGameRecord>> {
        let mut call = self
            .contract
            .method::<_, Vec<HistoryRow>>("getMyHistory", ())
            .map_err(GameError::network)?
            .from(account.address());
        if let Some(number) = block {
            call = call.block(BlockId::Number(BlockNumber::Number(U64::from(number))));
        }
        let rows = call.call().await.map_err(GameError::network)?;
        Ok(rows.into_iter().map(RawGameRecord::from).collect())
    }
}

impl Ledger for EvmLedger {
    async fn authorize_play(&self, account: &Account, choice: u8) -> Result<SignedPlay> {
        let wallet = self
            .keyring
            .signer(account)
            .ok_or_else(|| {
                GameError::SignatureDeclined(format!("no unlocked key for {account}"))
            })?
            .with_chain_id(self.chain_id);
        let mut tx = self.contract.play(choice).from(account.address()).tx;
        tx.set_chain_id(self.chain_id);
        self.provider
            .fill_transaction(&mut tx, None)
            .await
            .map_err(classify_provider_error)?;
        let signature = wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| GameError::SignatureDeclined(e.to_string()))?;
        debug!(%account, choice, "play transaction signed");
        Ok(SignedPlay {
            account: *account,
            choice,
            raw: tx.rlp_signed(&signature),
        })
    }

    async fn submit_play(&self, play: SignedPlay) -> Result<TxHash> {
        let pending = self
            .provider
            .send_raw_transaction(play.raw)
            .await
            .map_err(classify_provider_error)?;
        Ok(pending.tx_hash())
    }

    async fn await_confirmation(&self, tx_hash: TxHash) -> Result<Confirmation> {
        let receipt = PendingTransaction::new(tx_hash, self.provider.as_ref())
            .confirmations(self.confirmations)
            .await
            .map_err(classify_provider_error)?
            .ok_or_else(|| {
                GameError::SubmissionRejected(format!(
                    "transaction {tx_hash:#x} was dropped"
                ))
            })?;
        if receipt.status == Some(U64::zero()) {
            return Err(GameError::SubmissionRejected(format!(
                "transaction {tx_hash:#x} reverted"
            )));
        }
        Ok(Confirmation {
            tx_hash,
            block_number: receipt.block_number.map(|n| n.as_u64()),
        })
    }

    async fn outcome_of(
        &self,
        account: &Account,
        confirmation: Confirmation,
    ) -> Result<RawGameRecord> {
        self.history_at(account, confirmation.block_number)
            .await?
            .pop()
            .ok_or_else(|| {
                GameError::NetworkError(format!(
                    "no game recorded for confirmed transaction {:#x}",
                    confirmation.tx_hash
                ))
            })
    }

    async fn my_history(&self, account: &Account) -> Result<Vec<RawGameRecord>> {
        self.history_at(account, None).await
    }
}

/// Node-side rejections (an RPC error object) are distinguished from
/// transport failures.
fn classify_provider_error(err: ProviderError) -> GameError {
    if let ProviderError::JsonRpcClientError(inner) = &err
        && let Some(response) = inner.as_error_response()
    {
        return GameError::SubmissionRejected(response.message.clone());
    }
    GameError::network(err)
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use ethers::{
        abi::{
            Token,
            encode,
        },
        providers::{
            HttpClientError,
            JsonRpcError,
        },
    };

    fn offline_contract() -> RockPaperScissors<Provider<Http>> {
        let provider = Provider::<Http>::try_from("http://127.0.0.1:8545").unwrap();
        RockPaperScissors::new(Address::from_low_u64_be(0xc0ffee), Arc::new(provider))
    }

    fn row(player: Address, result: &str, choice: u8, house: u8, at: u64) -> Token {
        Token::Tuple(vec![
            Token::Address(player),
            Token::String(result.to_string()),
            Token::Uint(U256::from(choice)),
            Token::Uint(U256::from(house)),
            Token::Uint(U256::from(at)),
        ])
    }

    #[test]
    fn get_my_history__decodes_rows_in_ledger_order() {
        // given
        let player = Address::from_low_u64_be(1);
        let returned = encode(&[Token::Array(vec![
            row(player, "WIN", 1, 3, 100),
            row(player, "LOSE", 2, 3, 200),
        ])]);

        // when
        let rows: Vec<HistoryRow> = offline_contract()
            .decode_output("getMyHistory", returned)
            .unwrap();
        let records: Vec<RawGameRecord> = rows.into_iter().map(RawGameRecord::from).collect();

        // then
        assert_eq!(
            records,
            vec![
                RawGameRecord {
                    player,
                    result: "WIN".to_string(),
                    player_choice: 1,
                    house_choice: 3,
                    timestamp: U256::from(100),
                },
                RawGameRecord {
                    player,
                    result: "LOSE".to_string(),
                    player_choice: 2,
                    house_choice: 3,
                    timestamp: U256::from(200),
                },
            ]
        );
    }

    #[test]
    fn get_my_history__call_builds_against_the_bound_abi() {
        let contract = offline_contract();
        let call = contract.method::<_, Vec<HistoryRow>>("getMyHistory", ());
        assert!(call.is_ok());
    }

    #[test]
    fn classify_provider_error__rpc_error_object_is_a_rejection() {
        // given
        let err = ProviderError::JsonRpcClientError(Box::new(HttpClientError::JsonRpcError(
            JsonRpcError {
                code: -32000,
                message: "execution reverted".to_string(),
                data: None,
            },
        )));

        // when
        let classified = classify_provider_error(err);

        // then
        assert_eq!(
            classified,
            GameError::SubmissionRejected("execution reverted".to_string())
        );
    }

    #[test]
    fn classify_provider_error__transport_failure_is_a_network_error() {
        let err = ProviderError::CustomError("connection refused".to_string());
        assert!(matches!(classify_provider_error(err), GameError::NetworkError(_)));
    }
}
