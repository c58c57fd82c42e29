use crate::config::TimingConfig;
use crate::error::LpError;
use crate::liquidity::pool::AmmPoolClient;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::types::short;
use anchor_client::solana_sdk::signature::{Keypair, Signature};
use anyhow::Result;
use log::info;
use std::sync::Arc;

pub struct Withdraw {
    pub pool_client: Arc<dyn AmmPoolClient>,
    pub policy: RetryPolicy,
}

impl Withdraw {
    pub fn new(pool_client: Arc<dyn AmmPoolClient>, timing: &TimingConfig) -> Self {
        Self {
            pool_client,
            policy: RetryPolicy::new(timing.max_attempts, timing.retry_backoff_ms),
        }
    }

    // 取出全部流动性并领取手续费
    pub async fn withdraw_all(&self, owner: &Keypair, pool: &str, position: &str) -> Result<Vec<Signature>> {
        info!("准备提取流动性 {} (池子 {})", short(position), short(pool));
        let pool_client = &self.pool_client;
        let signatures = retry_with_backoff(&self.policy, "提取流动性", LpError::is_retryable, move |_| async move {
            pool_client.withdraw_liquidity(owner, pool, position).await
        })
        .await?;
        info!("➖ 已提取仓位 {}: {:?}", short(position), signatures);
        Ok(signatures)
    }
}
