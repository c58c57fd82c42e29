mod jupiter;

pub use jupiter::*;

use crate::config::TimingConfig;
use crate::error::LpError;
use crate::retry::{poll_until, retry_with_backoff, RetryPolicy};
use crate::types::{short, SOL_MINT};
use crate::utils::PendingSet;
use crate::wallet::ChainClient;
use anchor_client::solana_sdk::signature::{Keypair, Signature};
use anchor_client::solana_sdk::signer::Signer;
use anyhow::Result;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

pub struct SwapManager {
    pub executor: SwapExecutor,
    pub chain: Arc<dyn ChainClient>,
    pub policy: RetryPolicy,
    pub slippage_bps: u16,
    pub balance_polls: u32,
    pub balance_interval: Duration,
    // 同一钱包同一代币的换回SOL只允许一个在进行
    pub pending_swaps: PendingSet,
}

impl SwapManager {
    pub fn new(
        aggregator: Arc<dyn SwapAggregator>,
        chain: Arc<dyn ChainClient>,
        timing: &TimingConfig,
        slippage_bps: u16,
    ) -> Self {
        Self {
            executor: SwapExecutor::new(aggregator, chain.clone()),
            chain,
            policy: RetryPolicy::new(timing.max_attempts, timing.retry_backoff_ms),
            slippage_bps,
            balance_polls: timing.swap_balance_polls,
            balance_interval: Duration::from_millis(timing.swap_balance_interval_ms),
            pending_swaps: PendingSet::new(),
        }
    }

    // 带重试的交换
    pub async fn swap_with_retry(
        &self,
        owner: &Keypair,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
    ) -> Result<Signature> {
        let executor = &self.executor;
        let slippage_bps = self.slippage_bps;
        retry_with_backoff(&self.policy, "兑换", LpError::is_retryable, move |_| async move {
            executor.swap(owner, input_mint, output_mint, amount, slippage_bps).await
        })
        .await
    }

    // 兑换后轮询目标代币余额，返回兑换后的余额
    pub async fn swap_and_verify(
        &self,
        owner: &Keypair,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
    ) -> Result<u64> {
        let owner_pk = owner.pubkey();
        let before = self.chain.token_balance(&owner_pk, output_mint).await.unwrap_or(0);
        self.swap_with_retry(owner, input_mint, output_mint, amount).await?;

        let chain = &self.chain;
        let owner_pk = &owner_pk;
        let observed = poll_until(self.balance_polls, self.balance_interval, move |_| async move {
            match chain.token_balance(owner_pk, output_mint).await {
                Ok(balance) if balance > before => Some(balance),
                Ok(_) => None,
                Err(e) => {
                    warn!("⚠️ 查询 {} 余额失败: {:#}", short(output_mint), e);
                    None
                }
            }
        })
        .await;

        observed.ok_or_else(|| {
            LpError::PartialFailure(format!("兑换已确认但 {} 余额未增加", short(output_mint))).into()
        })
    }

    // 代币换回SOL；已有同一钱包同一代币的换回在进行时返回None
    pub async fn swap_back_to_sol(&self, owner: &Keypair, mint: &str, amount: u64) -> Result<Option<Signature>> {
        let key = format!("{}:{}", owner.pubkey(), mint);
        let _guard = match self.pending_swaps.try_acquire(&key) {
            Some(guard) => guard,
            None => {
                info!("⏳ {} 的换回已在进行，跳过", short(mint));
                return Ok(None);
            }
        };
        let signature = self.swap_with_retry(owner, mint, SOL_MINT, amount).await?;
        Ok(Some(signature))
    }

    pub async fn unwrap_wsol_with_retry(&self, owner: &Keypair) -> Result<Option<Signature>> {
        let chain = &self.chain;
        retry_with_backoff(&self.policy, "解包WSOL", LpError::is_retryable, move |_| async move {
            chain.unwrap_wsol(owner).await
        })
        .await
    }
}
