//! Blockchain Service
//!
//! Chain reader and writer over an EVM JSON-RPC endpoint.
//!
//! # Features
//! - Native coin / ERC-20 balance queries
//! - Gas price and block height
//! - Native transfer and ERC-20 `transfer` broadcast
//! - Confirmation wait
//!
//! Every RPC call is bounded by the configured timeout. A timeout is a
//! retryable failure and is never reported as success.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::{
    middleware::SignerMiddleware,
    providers::{Http, Middleware, PendingTransaction, Provider},
    signers::{coins_bip39::English, LocalWallet, MnemonicBuilder, Signer},
    types::{Address, TransactionRequest, H256, U256, U64},
};
use thiserror::Error;
use zeroize::Zeroizing;

ethers::contract::abigen!(
    Erc20,
    r#"[
        function balanceOf(address owner) view returns (uint256)
        function transfer(address to, uint256 amount) returns (bool)
    ]"#
);

/// 체인 계층 에러
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("RPC call timed out after {0:?}")]
    Timeout(Duration),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("signing key is invalid")]
    InvalidKey,

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("transaction reverted: {0}")]
    Reverted(String),
}

pub type ChainResult<T> = Result<T, ChainError>;

/// 노드가 가스 가격을 주지 않을 때 사용 (30 gwei)
pub const FALLBACK_GAS_PRICE_WEI: u64 = 30_000_000_000;

/// 체인 읽기/쓰기 능력
///
/// 금액은 모두 최소 단위(wei, 토큰 base unit)의 `U256`.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn native_balance(&self, address: Address) -> ChainResult<U256>;

    async fn token_balance(&self, contract: Address, owner: Address) -> ChainResult<U256>;

    async fn gas_price(&self) -> ChainResult<Option<U256>>;

    async fn block_number(&self) -> ChainResult<u64>;

    /// 네이티브 코인 송금. 서명 키는 평문 hex.
    async fn send_native(
        &self,
        signer_key: &str,
        to: Address,
        value: U256,
        gas_limit: U256,
        gas_price: U256,
    ) -> ChainResult<H256>;

    /// ERC-20 `transfer(to, amount)`
    async fn send_token(
        &self,
        signer_key: &str,
        contract: Address,
        to: Address,
        amount: U256,
    ) -> ChainResult<H256>;

    /// `confirmations` 블록 확인까지 대기. 실패한 receipt는 `Reverted`.
    async fn wait_for_confirmation(&self, tx_hash: H256, confirmations: usize) -> ChainResult<()>;
}

/// 평문 개인키 → 서명자
pub fn signer_from_key(key: &str) -> ChainResult<LocalWallet> {
    let key = key.trim();
    let key = key.strip_prefix("0x").unwrap_or(key);
    key.parse::<LocalWallet>().map_err(|_| ChainError::InvalidKey)
}

/// 평문 개인키의 주소
pub fn address_of(key: &str) -> ChainResult<Address> {
    Ok(signer_from_key(key)?.address())
}

/// 새 키쌍. 개인키는 `0x` 접두 hex.
pub fn generate_key() -> (Zeroizing<String>, Address) {
    let wallet = LocalWallet::new(&mut rand::thread_rng());
    (encode_key(&wallet), wallet.address())
}

/// BIP-39 니모닉의 첫 번째 계정 키
pub fn key_from_phrase(phrase: &str) -> ChainResult<Zeroizing<String>> {
    let wallet = MnemonicBuilder::<English>::default()
        .phrase(phrase.trim())
        .index(0u32)
        .map_err(|_| ChainError::InvalidKey)?
        .build()
        .map_err(|_| ChainError::InvalidKey)?;
    Ok(encode_key(&wallet))
}

fn encode_key(wallet: &LocalWallet) -> Zeroizing<String> {
    let bytes = Zeroizing::new(wallet.signer().to_bytes().to_vec());
    Zeroizing::new(format!("0x{}", hex::encode(bytes.as_slice())))
}

/// 가스 가격. 노드가 값을 주지 않으면 고정값.
pub async fn effective_gas_price(chain: &dyn ChainClient) -> ChainResult<U256> {
    Ok(chain
        .gas_price()
        .await?
        .unwrap_or_else(|| U256::from(FALLBACK_GAS_PRICE_WEI)))
}

/// EIP-55 체크섬 표기 (저장/응답용)
pub fn checksum(address: Address) -> String {
    ethers::utils::to_checksum(&address, None)
}

pub fn parse_address(value: &str) -> ChainResult<Address> {
    value
        .trim()
        .parse::<Address>()
        .map_err(|_| ChainError::InvalidAddress(value.to_string()))
}

/// ethers 기반 구현
pub struct EthersChain {
    provider: Arc<Provider<Http>>,
    chain_id: u64,
    timeout: Duration,
}

impl EthersChain {
    pub fn new(rpc_url: &str, chain_id: u64, timeout: Duration) -> anyhow::Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)?;
        Ok(Self {
            provider: Arc::new(provider),
            chain_id,
            timeout,
        })
    }

    /// 타임아웃 + 에러 변환
    async fn bounded<T, E, F>(&self, call: F) -> ChainResult<T>
    where
        F: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ChainError::Rpc(e.to_string())),
            Err(_) => Err(ChainError::Timeout(self.timeout)),
        }
    }

    fn signing_client(&self, key: &str) -> ChainResult<SignerMiddleware<Arc<Provider<Http>>, LocalWallet>> {
        let wallet = signer_from_key(key)?.with_chain_id(self.chain_id);
        Ok(SignerMiddleware::new(self.provider.clone(), wallet))
    }
}

#[async_trait]
impl ChainClient for EthersChain {
    async fn native_balance(&self, address: Address) -> ChainResult<U256> {
        self.bounded(self.provider.get_balance(address, None)).await
    }

    async fn token_balance(&self, contract: Address, owner: Address) -> ChainResult<U256> {
        let token = Erc20::new(contract, self.provider.clone());
        let call = token.balance_of(owner);
        self.bounded(call.call()).await
    }

    async fn gas_price(&self) -> ChainResult<Option<U256>> {
        let price = self.bounded(self.provider.get_gas_price()).await?;
        Ok(if price.is_zero() { None } else { Some(price) })
    }

    async fn block_number(&self) -> ChainResult<u64> {
        let number: U64 = self.bounded(self.provider.get_block_number()).await?;
        Ok(number.as_u64())
    }

    async fn send_native(
        &self,
        signer_key: &str,
        to: Address,
        value: U256,
        gas_limit: U256,
        gas_price: U256,
    ) -> ChainResult<H256> {
        let client = self.signing_client(signer_key)?;
        let request = TransactionRequest::new()
            .to(to)
            .value(value)
            .gas(gas_limit)
            .gas_price(gas_price);

        let pending = self.bounded(client.send_transaction(request, None)).await?;
        Ok(pending.tx_hash())
    }

    async fn send_token(
        &self,
        signer_key: &str,
        contract: Address,
        to: Address,
        amount: U256,
    ) -> ChainResult<H256> {
        let client = Arc::new(self.signing_client(signer_key)?);
        let token = Erc20::new(contract, client);
        let call = token.transfer(to, amount);

        let pending = self.bounded(call.send()).await?;
        Ok(pending.tx_hash())
    }

    async fn wait_for_confirmation(&self, tx_hash: H256, confirmations: usize) -> ChainResult<()> {
        let pending = PendingTransaction::new(tx_hash, self.provider.as_ref()).confirmations(confirmations);

        // 블록 대기는 일반 호출보다 길게 허용
        let wait = self.timeout * 8;
        let receipt = match tokio::time::timeout(wait, pending).await {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(e)) => return Err(ChainError::Rpc(e.to_string())),
            Err(_) => return Err(ChainError::Timeout(wait)),
        };

        match receipt {
            Some(r) if r.status == Some(U64::from(1)) => Ok(()),
            Some(_) => Err(ChainError::Reverted(format!("{:?}", tx_hash))),
            None => Err(ChainError::Rpc(format!("transaction {:?} dropped", tx_hash))),
        }
    }
}

// 테스트용 Mock 구현:

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// 기록된 브로드캐스트
    #[derive(Debug, Clone, PartialEq)]
    pub enum Sent {
        Native { from: Address, to: Address, value: U256 },
        Token { from: Address, contract: Address, to: Address, amount: U256 },
    }

    #[derive(Default)]
    struct State {
        native: HashMap<Address, U256>,
        tokens: HashMap<(Address, Address), U256>,
        gas_price: Option<U256>,
        sent: Vec<Sent>,
        fail_reads: bool,
        fail_sends: bool,
        /// 확인 대기 시 네이티브 입금을 반영하지 않음 (가스 충전 유실 흉내)
        drop_refuels: bool,
        /// 송금은 체인에 반영하되 응답은 타임아웃
        timeout_after_send: bool,
        pending_native: Vec<(Address, U256)>,
    }

    /// 잔고/가스 가격을 스크립트로 정하고 송금을 기록하는 가짜 체인.
    /// 네이티브 송금은 확인(wait_for_confirmation) 시점에 수신자 잔고에 반영된다.
    #[derive(Default)]
    pub struct MockChain {
        state: Mutex<State>,
    }

    impl MockChain {
        pub fn new() -> Self {
            let chain = Self::default();
            chain.state.lock().unwrap().gas_price = Some(U256::from(10_000_000_000u64));
            chain
        }

        pub fn set_native(&self, address: Address, value: U256) {
            self.state.lock().unwrap().native.insert(address, value);
        }

        pub fn set_token(&self, contract: Address, owner: Address, value: U256) {
            self.state.lock().unwrap().tokens.insert((contract, owner), value);
        }

        pub fn set_gas_price(&self, price: Option<U256>) {
            self.state.lock().unwrap().gas_price = price;
        }

        pub fn fail_reads(&self, fail: bool) {
            self.state.lock().unwrap().fail_reads = fail;
        }

        pub fn fail_sends(&self, fail: bool) {
            self.state.lock().unwrap().fail_sends = fail;
        }

        pub fn drop_refuels(&self, drop: bool) {
            self.state.lock().unwrap().drop_refuels = drop;
        }

        pub fn timeout_after_send(&self, timeout: bool) {
            self.state.lock().unwrap().timeout_after_send = timeout;
        }

        pub fn sent(&self) -> Vec<Sent> {
            self.state.lock().unwrap().sent.clone()
        }

        fn read_guard(state: &State) -> ChainResult<()> {
            if state.fail_reads {
                Err(ChainError::Timeout(Duration::from_secs(15)))
            } else {
                Ok(())
            }
        }

        fn reply(state: &State, hash: H256) -> ChainResult<H256> {
            if state.timeout_after_send {
                Err(ChainError::Timeout(Duration::from_secs(15)))
            } else {
                Ok(hash)
            }
        }

        fn next_hash(state: &State) -> H256 {
            H256::from_low_u64_be(state.sent.len() as u64 + 1)
        }
    }

    #[async_trait]
    impl ChainClient for MockChain {
        async fn native_balance(&self, address: Address) -> ChainResult<U256> {
            let state = self.state.lock().unwrap();
            Self::read_guard(&state)?;
            Ok(state.native.get(&address).copied().unwrap_or_default())
        }

        async fn token_balance(&self, contract: Address, owner: Address) -> ChainResult<U256> {
            let state = self.state.lock().unwrap();
            Self::read_guard(&state)?;
            Ok(state.tokens.get(&(contract, owner)).copied().unwrap_or_default())
        }

        async fn gas_price(&self) -> ChainResult<Option<U256>> {
            let state = self.state.lock().unwrap();
            Self::read_guard(&state)?;
            Ok(state.gas_price)
        }

        async fn block_number(&self) -> ChainResult<u64> {
            let state = self.state.lock().unwrap();
            Self::read_guard(&state)?;
            Ok(19_000_000)
        }

        async fn send_native(
            &self,
            signer_key: &str,
            to: Address,
            value: U256,
            gas_limit: U256,
            gas_price: U256,
        ) -> ChainResult<H256> {
            let from = address_of(signer_key)?;
            let mut state = self.state.lock().unwrap();
            if state.fail_sends {
                return Err(ChainError::Rpc("nonce too low".to_string()));
            }
            let cost = value + gas_limit * gas_price;
            let balance = state.native.get(&from).copied().unwrap_or_default();
            if balance < cost {
                return Err(ChainError::Rpc("insufficient funds for gas * price + value".to_string()));
            }
            state.native.insert(from, balance - cost);
            state.pending_native.push((to, value));
            let hash = Self::next_hash(&state);
            state.sent.push(Sent::Native { from, to, value });
            Self::reply(&state, hash)
        }

        async fn send_token(
            &self,
            signer_key: &str,
            contract: Address,
            to: Address,
            amount: U256,
        ) -> ChainResult<H256> {
            let from = address_of(signer_key)?;
            let mut state = self.state.lock().unwrap();
            if state.fail_sends {
                return Err(ChainError::Rpc("nonce too low".to_string()));
            }
            let price = state.gas_price.unwrap_or_default();
            let gas = U256::from(65_000u64) * price;
            let native = state.native.get(&from).copied().unwrap_or_default();
            if native < gas {
                return Err(ChainError::Rpc("insufficient funds for gas".to_string()));
            }
            let held = state.tokens.get(&(contract, from)).copied().unwrap_or_default();
            if held < amount {
                return Err(ChainError::Reverted("transfer amount exceeds balance".to_string()));
            }
            state.native.insert(from, native - gas);
            state.tokens.insert((contract, from), held - amount);
            let hash = Self::next_hash(&state);
            state.sent.push(Sent::Token { from, contract, to, amount });
            Self::reply(&state, hash)
        }

        async fn wait_for_confirmation(&self, _tx_hash: H256, _confirmations: usize) -> ChainResult<()> {
            let mut state = self.state.lock().unwrap();
            let pending = std::mem::take(&mut state.pending_native);
            if !state.drop_refuels {
                for (to, value) in pending {
                    *state.native.entry(to).or_default() += value;
                }
            }
            Ok(())
        }
    }
}
