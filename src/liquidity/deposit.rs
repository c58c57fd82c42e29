use crate::config::{LiquidityConfig, TimingConfig};
use crate::error::LpError;
use crate::liquidity::bin_range::{bin_array_indexes, missing_bins, range_for_mode};
use crate::liquidity::pool::{ActiveBin, AmmPoolClient, DepositRequest};
use crate::retry::{poll_until, retry_with_backoff, RetryPolicy};
use crate::types::{short, AnchorSide, BinRange, LiquidityMode};
use anchor_client::solana_sdk::signature::{Keypair, Signature};
use anchor_client::solana_sdk::signer::Signer;
use anyhow::Result;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum DepositPlan {
    Ready { active: ActiveBin, range: BinRange },
    Skip(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DepositOutcome {
    pub position: String,
    pub signature: Signature,
    pub range: BinRange,
    pub amount_x: u64,
    pub amount_y: u64,
}

pub struct Depositor {
    pub pool_client: Arc<dyn AmmPoolClient>,
    pub config: LiquidityConfig,
    pub policy: RetryPolicy,
    pub verify_polls: u32,
    pub verify_interval: Duration,
}

impl Depositor {
    pub fn new(pool_client: Arc<dyn AmmPoolClient>, config: &LiquidityConfig, timing: &TimingConfig) -> Self {
        Self {
            pool_client,
            config: config.clone(),
            policy: RetryPolicy::new(timing.max_attempts, timing.retry_backoff_ms),
            verify_polls: timing.deposit_verify_polls,
            verify_interval: Duration::from_millis(timing.deposit_verify_interval_ms),
        }
    }

    // 读取活跃bin，计算区间并检查区间内所有bin都已初始化
    pub async fn plan(&self, pool: &str) -> Result<DepositPlan> {
        let active = self.pool_client.get_active_bin(pool).await?;
        let range = range_for_mode(
            active.bin_id,
            self.config.half_width_bins,
            self.config.mode,
            self.config.anchor,
        );
        debug!(
            "池子 {} 活跃bin {}，区间 [{}, {}]，bin数组 {:?}",
            short(pool),
            active.bin_id,
            range.lower_bin_id,
            range.upper_bin_id,
            bin_array_indexes(range)
        );

        let initialized = self.pool_client.list_initialized_bins(pool, range).await?;
        let missing = missing_bins(range, &initialized);
        if !missing.is_empty() {
            return Ok(DepositPlan::Skip(format!(
                "池子 {} 区间内有 {} 个bin未初始化",
                short(pool),
                missing.len()
            )));
        }
        Ok(DepositPlan::Ready { active, range })
    }

    // 按配置确定两侧数量。平衡模式下兑换得到的总是X，Y按策略计算
    async fn amounts(&self, pool: &str, active: ActiveBin, range: BinRange, anchor_amount: u64) -> Result<(u64, u64)> {
        match (self.config.mode, self.config.anchor) {
            (LiquidityMode::OneSided, AnchorSide::X) => Ok((anchor_amount, 0)),
            (LiquidityMode::OneSided, AnchorSide::Y) => Ok((0, anchor_amount)),
            (LiquidityMode::Balanced, _) => {
                let counter = self
                    .pool_client
                    .compute_counter_amount(pool, active.bin_id, range, anchor_amount, AnchorSide::X, self.config.strategy)
                    .await?;
                Ok((anchor_amount, counter))
            }
        }
    }

    pub async fn deposit(&self, pool: &str, owner: &Keypair, anchor_amount: u64) -> Result<DepositOutcome> {
        let (active, range) = match self.plan(pool).await? {
            DepositPlan::Ready { active, range } => (active, range),
            DepositPlan::Skip(reason) => return Err(LpError::Skip(reason).into()),
        };

        let (amount_x, amount_y) = self.amounts(pool, active, range, anchor_amount).await?;
        if amount_x == 0 && amount_y == 0 {
            return Err(LpError::Skip(format!("池子 {} 两侧数量均为0", short(pool))).into());
        }

        let owner_pk = owner.pubkey();
        let existing: HashSet<String> = self
            .pool_client
            .list_owner_positions(pool, &owner_pk)
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|p| p.position)
            .collect();

        let request = DepositRequest {
            pool: pool.to_string(),
            range,
            amount_x,
            amount_y,
            strategy: self.config.strategy,
            slippage_bps: self.config.deposit_slippage_bps,
        };
        info!(
            "➕ 添加流动性 {}: X={} Y={} 区间 [{}, {}]",
            short(pool),
            amount_x,
            amount_y,
            range.lower_bin_id,
            range.upper_bin_id
        );

        let pool_client = &self.pool_client;
        let request = &request;
        let signature = retry_with_backoff(&self.policy, "添加流动性", LpError::is_retryable, move |_| async move {
            pool_client.deposit_liquidity(owner, request).await
        })
        .await?;

        // 等待新仓位出现在该钱包名下
        let owner_pk = &owner_pk;
        let existing = &existing;
        let position = poll_until(self.verify_polls, self.verify_interval, move |_| async move {
            match pool_client.list_owner_positions(pool, owner_pk).await {
                Ok(positions) => positions
                    .into_iter()
                    .map(|p| p.position)
                    .find(|p| !existing.contains(p)),
                Err(e) => {
                    warn!("⚠️ 查询仓位失败: {:#}", e);
                    None
                }
            }
        })
        .await
        .ok_or_else(|| {
            LpError::PartialFailure(format!("存入交易 {} 已确认但未找到新仓位", signature))
        })?;

        info!("✅ 仓位已创建 {} 于池子 {}", position, short(pool));
        Ok(DepositOutcome { position, signature, range, amount_x, amount_y })
    }
}
