mod metrics;
mod price_range;

pub use metrics::*;
pub use price_range::*;

use crate::config::Config;
use crate::liquidity::{value_position, LiquidityManager, OwnerPosition, PoolInfo};
use crate::oracle::PriceOracle;
use crate::retry::poll_until;
use crate::state::{PositionRecord, StateStore};
use crate::swap::SwapManager;
use crate::types::short;
use crate::utils::{now_ms, PendingSet};
use anchor_client::solana_sdk::signature::Keypair;
use anchor_client::solana_sdk::signer::Signer;
use anyhow::{anyhow, Result};
use log::{error, info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;

const MINUTE_MS: i64 = 60 * 1000;
const HOUR_MS: i64 = 60 * MINUTE_MS;

// 所有监控任务共享的依赖
pub struct MonitorContext {
    pub config: Arc<Config>,
    pub store: Arc<StateStore>,
    pub liquidity: Arc<LiquidityManager>,
    pub swaps: Arc<SwapManager>,
    pub oracle: Arc<dyn PriceOracle>,
    pub pending_exits: PendingSet,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Active,
    Closed,
}

// 监控任务结束时发给调度循环
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorEvent {
    pub slot: usize,
    pub pool: String,
    pub mint: String,
}

// 单个 (池子, 钱包) 的监控
pub struct PositionMonitor {
    pub ctx: Arc<MonitorContext>,
    pub pool: String,
    pub mint: String,
    pub owner: Arc<Keypair>,
    owner_address: String,
    pool_info: Option<PoolInfo>,
    empty_ticks: u32,
}

impl PositionMonitor {
    pub fn new(ctx: Arc<MonitorContext>, pool: &str, mint: &str, owner: Arc<Keypair>) -> Self {
        let owner_address = owner.pubkey().to_string();
        Self {
            ctx,
            pool: pool.to_string(),
            mint: mint.to_string(),
            owner,
            owner_address,
            pool_info: None,
            empty_ticks: 0,
        }
    }

    async fn pool_info(&mut self) -> Result<PoolInfo> {
        if let Some(info) = &self.pool_info {
            return Ok(info.clone());
        }
        let info = self.ctx.liquidity.pool_client.pool_info(&self.pool).await?;
        self.pool_info = Some(info.clone());
        Ok(info)
    }

    // 定时检查，直到仓位关闭后通知调度循环
    pub async fn run(mut self, slot: usize, events: mpsc::Sender<MonitorEvent>) {
        let interval = Duration::from_millis(self.ctx.config.timing.monitor_tick_ms);
        loop {
            match self.tick(now_ms()).await {
                Ok(TickOutcome::Closed) => break,
                Ok(TickOutcome::Active) => {}
                Err(e) => warn!("⚠️ 监控 {} ({}) 出错: {:#}", short(&self.pool), short(&self.owner_address), e),
            }
            sleep(interval).await;
        }

        info!("🏁 池子 {} 的监控结束", short(&self.pool));
        let event = MonitorEvent { slot, pool: self.pool.clone(), mint: self.mint.clone() };
        if events.send(event).await.is_err() {
            error!("❌ 调度循环已退出，无法报告池子 {} 关闭", short(&self.pool));
        }
    }

    pub async fn tick(&mut self, now: i64) -> Result<TickOutcome> {
        let info = self.pool_info().await?;
        let owner_pk = self.owner.pubkey();
        let positions = self
            .ctx
            .liquidity
            .pool_client
            .list_owner_positions(&self.pool, &owner_pk)
            .await?;

        if positions.is_empty() {
            self.empty_ticks += 1;
        } else {
            self.empty_ticks = 0;
            let active = self.ctx.liquidity.pool_client.get_active_bin(&self.pool).await?;
            let mints = vec![info.mint_x.clone(), info.mint_y.clone()];
            let prices = self.ctx.oracle.price_of(&mints).await?;
            let price_x = *prices
                .get(&info.mint_x)
                .ok_or_else(|| anyhow!("缺少 {} 的价格", short(&info.mint_x)))?;
            let price_y = *prices
                .get(&info.mint_y)
                .ok_or_else(|| anyhow!("缺少 {} 的价格", short(&info.mint_y)))?;
            let forced = self.ctx.store.load_force_removals()?;

            for position in &positions {
                if self.ctx.pending_exits.contains(&position.position) {
                    continue;
                }
                let is_forced = forced.is_forced(&position.position);
                if let Err(e) = self
                    .check_position(position, &info, active.bin_id, price_x, price_y, is_forced, now)
                    .await
                {
                    warn!("⚠️ 仓位 {} 检查失败: {:#}", short(&position.position), e);
                }
            }
        }

        // 链上已不存在的仓位标记关闭，并清理过期记录
        let present: HashSet<String> = positions.iter().map(|p| p.position.clone()).collect();
        let pool = self.pool.clone();
        let owner = self.owner_address.clone();
        let (reconciled, has_any, has_open) = self.ctx.store.update_positions(|s| {
            let reconciled = s.reconcile(&pool, &owner, &present);
            s.purge(now);
            (reconciled, s.has_any_for(&pool, &owner), s.has_open_for(&pool, &owner))
        })?;
        for key in &reconciled {
            info!("🧹 仓位 {} 已不在链上，标记为关闭", short(key));
        }

        let max_empty = self.ctx.config.exit.max_empty_ticks;
        if (has_any && !has_open) || (!has_any && positions.is_empty() && self.empty_ticks >= max_empty) {
            return Ok(TickOutcome::Closed);
        }
        Ok(TickOutcome::Active)
    }

    #[allow(clippy::too_many_arguments)]
    async fn check_position(
        &self,
        position: &OwnerPosition,
        info: &PoolInfo,
        active_id: i32,
        price_x: f64,
        price_y: f64,
        forced: bool,
        now: i64,
    ) -> Result<()> {
        let config = &self.ctx.config;
        let key = position.position.as_str();
        let value = value_position(position, info, price_x, price_y);
        let in_range = PriceRangeMonitor::is_price_in_range(active_id, position.range());
        let timeout_ms = config.exit.out_of_range_timeout_minutes as i64 * MINUTE_MS;

        let (record, fired) = self.ctx.store.update_positions(|s| {
            let record = s.track(
                key,
                PositionRecord::new(value.total_usd, &self.pool, &self.owner_address, &info.mint_x, now),
            );
            record.last_seen = now;
            if forced {
                record.force_remove = true;
            }
            let fired = PriceRangeMonitor::update_out_of_range(record, in_range, now, timeout_ms);
            (record.clone(), fired)
        })?;

        if record.is_closed {
            return Ok(());
        }
        if fired {
            warn!(
                "⚠️ 仓位 {} 超出区间已 {} 分钟，按止损退出",
                short(key),
                config.exit.out_of_range_timeout_minutes
            );
        }

        let percent = pnl_percent(record.start_usd, value.total_usd);
        let il = impermanent_loss_pct(info.bin_step, active_id, position.range());
        MetricsCollector::log_snapshot(key, &value, record.start_usd, percent, il, in_range);

        let reason = PriceRangeMonitor::decide_exit(
            percent,
            config.take_profit_pct,
            config.stop_loss_pct,
            fired,
            record.force_remove,
        );
        if let Some(reason) = reason {
            self.exit(key, reason, percent, now).await?;
        }
        Ok(())
    }

    // 退出流程，同一仓位同时只有一个在进行
    pub async fn exit(&self, key: &str, reason: ExitReason, percent: f64, now: i64) -> Result<()> {
        let _guard = match self.ctx.pending_exits.try_acquire(key) {
            Some(guard) => guard,
            None => {
                info!("⏳ 仓位 {} 已在退出中", short(key));
                return Ok(());
            }
        };
        info!("🚪 仓位 {} 退出: {:?} ({:+.2}%)", short(key), reason, percent);

        if let Err(e) = self
            .ctx
            .liquidity
            .withdraw_manager
            .withdraw_all(&self.owner, &self.pool, key)
            .await
        {
            let message = format!("{:#}", e);
            self.ctx.store.update_positions(|s| {
                if let Some(record) = s.get_mut(key) {
                    record.exit_failures += 1;
                    record.last_exit_error = Some(message.clone());
                    // 下一次检查重新触发
                    record.out_of_range_triggered = false;
                }
            })?;
            error!("❌ 仓位 {} 提取失败，保持打开: {}", short(key), message);
            return Err(e);
        }

        // 流动性已经取出，状态写入失败也要继续换回代币
        if let Err(e) = self.record_closure(key, reason, now) {
            error!("❌ 仓位 {} 关闭状态写入失败: {:#}", short(key), e);
        }
        if let Err(e) = self.ctx.store.update_force_removals(|t| t.clear(key)) {
            error!("❌ 清除仓位 {} 的强制移除标记失败: {:#}", short(key), e);
        }
        self.sweep_base_token().await;
        Ok(())
    }

    // 标记关闭，并按退出原因更新亏损计数和冷却
    fn record_closure(&self, key: &str, reason: ExitReason, now: i64) -> Result<()> {
        let exit = &self.ctx.config.exit;
        let mint = self.mint.clone();

        let cooldown = self.ctx.store.update_positions(|s| {
            let streak = s.loss_streak(&mint, key);
            let record = s.get_mut(key)?;
            record.mark_closed();
            record.removed_at = Some(now);
            record.force_remove = false;

            let until = match reason {
                ExitReason::Forced => {
                    record.manual_triggered = true;
                    None
                }
                ExitReason::TakeProfit => {
                    record.loss_count = 0;
                    Some(now + exit.take_profit_cooldown_hours as i64 * HOUR_MS)
                }
                ExitReason::StopLoss | ExitReason::OutOfRange => {
                    record.loss_count = streak + 1;
                    if record.loss_count >= exit.max_consecutive_losses {
                        Some(now + exit.loss_cooldown_hours as i64 * HOUR_MS)
                    } else {
                        None
                    }
                }
            };
            if let Some(until) = until {
                record.set_cooldown_until(until);
            }
            until
        })?;

        if let Some(until) = cooldown {
            let effective = self.ctx.store.extend_cooldown(&self.mint, until)?;
            info!(
                "🧊 {} 冷却 {} 分钟",
                short(&self.mint),
                (effective - now) / MINUTE_MS
            );
        }
        if reason.is_loss() {
            info!("📉 {} 连续亏损已记录", short(&self.mint));
        }
        Ok(())
    }

    // 等待提取的代币到账，超过灰尘阈值就换回SOL，最后解包WSOL
    async fn sweep_base_token(&self) {
        let timing = &self.ctx.config.timing;
        let dust = self.ctx.config.exit.dust_threshold;
        let chain = &self.ctx.swaps.chain;
        let owner_pk = self.owner.pubkey();
        let owner_pk = &owner_pk;
        let mint = self.mint.as_str();

        let balance = poll_until(
            timing.exit_balance_polls,
            Duration::from_millis(timing.exit_balance_interval_ms),
            move |_| async move {
                match chain.token_balance(owner_pk, mint).await {
                    // 钱包里原有的灰尘不算到账
                    Ok(balance) if balance > dust => Some(balance),
                    _ => None,
                }
            },
        )
        .await
        .unwrap_or(0);

        if balance > dust {
            match self.ctx.swaps.swap_back_to_sol(&self.owner, mint, balance).await {
                Ok(Some(signature)) => info!("🔄 {} 已换回SOL: {}", short(mint), signature),
                Ok(None) => {}
                Err(e) => error!("❌ {} 换回SOL失败: {:#}", short(mint), e),
            }
        } else {
            info!("{} 余额 {} 低于阈值，不换回", short(mint), balance);
        }

        if let Err(e) = self.ctx.swaps.unwrap_wsol_with_retry(&self.owner).await {
            warn!("⚠️ 解包WSOL失败: {:#}", e);
        }
    }
}
