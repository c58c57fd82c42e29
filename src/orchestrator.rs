use crate::config::Config;
use crate::discovery::CandidateSource;
use crate::error::LpError;
use crate::liquidity::DepositPlan;
use crate::monitoring::{MonitorContext, MonitorEvent, PositionMonitor};
use crate::scheduler::{Reservation, Scheduler};
use crate::types::{short, Candidate, LiquidityMode, SOL_MINT};
use crate::utils::now_ms;
use crate::wallet::WalletManager;
use anchor_client::solana_sdk::signature::Keypair;
use anchor_client::solana_sdk::signer::Signer;
use anyhow::{Context, Result};
use log::{error, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

const MINUTE_MS: i64 = 60 * 1000;
const EVENT_BUFFER: usize = 64;

struct MonitorHandle {
    handle: JoinHandle<()>,
    owner: String,
}

// 调度循环独占钱包分配和监控表，监控任务只通过通道报告
pub struct Orchestrator {
    pub config: Arc<Config>,
    pub ctx: Arc<MonitorContext>,
    pub source: Arc<dyn CandidateSource>,
    pub wallets: Arc<WalletManager>,
    pub scheduler: Scheduler,
    registry: HashMap<String, MonitorHandle>,
    events_tx: mpsc::Sender<MonitorEvent>,
    events_rx: mpsc::Receiver<MonitorEvent>,
}

impl Orchestrator {
    pub fn new(ctx: Arc<MonitorContext>, source: Arc<dyn CandidateSource>, wallets: Arc<WalletManager>) -> Self {
        let config = ctx.config.clone();
        let scheduler = Scheduler::new(&wallets.keypairs, &config.scheduler, config.liquidity.anchor);
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        Self {
            config,
            ctx,
            source,
            wallets,
            scheduler,
            registry: HashMap::new(),
            events_tx,
            events_rx,
        }
    }

    pub fn is_monitored(&self, pool: &str) -> bool {
        self.registry.contains_key(pool)
    }

    pub fn monitored_pools(&self) -> Vec<String> {
        self.registry.keys().cloned().collect()
    }

    pub async fn run(mut self) -> Result<()> {
        self.startup().await;
        let _sweeper = self.spawn_wsol_sweeper();

        loop {
            let delay = match self.run_cycle().await {
                Ok(()) => self.config.timing.scan_interval_ms,
                Err(e) => {
                    error!("❌ 扫描出错: {:#}", e);
                    self.config.timing.error_backoff_ms
                }
            };

            // 等待期间继续处理监控任务的关闭通知
            let wait = sleep(Duration::from_millis(delay));
            tokio::pin!(wait);
            loop {
                tokio::select! {
                    _ = &mut wait => break,
                    Some(event) = self.events_rx.recv() => self.on_monitor_closed(event),
                }
            }
        }
    }

    // 余额报告、初始WSOL解包、恢复上次运行留下的仓位
    pub async fn startup(&mut self) {
        self.wallets.report_balances(self.ctx.swaps.chain.as_ref()).await;
        for keypair in &self.wallets.keypairs {
            if let Err(e) = self.ctx.swaps.unwrap_wsol_with_retry(keypair).await {
                warn!("⚠️ 钱包 {} 解包WSOL失败: {:#}", short(&keypair.pubkey().to_string()), e);
            }
        }
        self.resume_open_positions();
    }

    pub fn resume_open_positions(&mut self) {
        // (池子, 钱包) -> 代币
        let mut open: BTreeMap<(String, String), String> = BTreeMap::new();
        self.ctx.store.read_positions(|s| {
            for (_, record) in s.open_positions() {
                open.insert((record.pool.clone(), record.owner.clone()), record.mint_x.clone());
            }
        });

        for ((pool, owner), mint) in open {
            if self.is_monitored(&pool) {
                continue;
            }
            let slot = match self.scheduler.slot_of(&owner) {
                Some(slot) => slot,
                None => {
                    warn!("⚠️ 仓位所属钱包 {} 不在钱包列表中，跳过恢复", short(&owner));
                    continue;
                }
            };
            if let Err(e) = self.scheduler.record_occupancy(slot, &mint, &pool) {
                warn!("⚠️ 恢复占用失败: {:#}", e);
            }
            let keypair = self.scheduler.slots[slot].keypair.clone();
            info!("♻️ 恢复监控池子 {} (钱包 {})", short(&pool), short(&owner));
            self.spawn_monitor(slot, &pool, &mint, keypair);
        }
    }

    fn spawn_wsol_sweeper(&self) -> JoinHandle<()> {
        let swaps = self.ctx.swaps.clone();
        let keypairs = self.wallets.keypairs.clone();
        let interval = Duration::from_millis(self.config.timing.wsol_sweep_interval_ms);
        tokio::spawn(async move {
            loop {
                sleep(interval).await;
                for keypair in &keypairs {
                    if let Err(e) = swaps.unwrap_wsol_with_retry(keypair).await {
                        warn!("⚠️ 定时解包WSOL失败: {:#}", e);
                    }
                }
            }
        })
    }

    // 一轮扫描：获取候选，依次尝试入场
    pub async fn run_cycle(&mut self) -> Result<()> {
        self.drain_events();
        let candidates = self.source.fetch_candidates().await.context("获取候选代币失败")?;
        info!("🔍 本轮 {} 个候选代币，{} 个池子监控中", candidates.len(), self.registry.len());

        for candidate in candidates {
            self.drain_events();
            let pool = match self.source.resolve_pool(&candidate).await {
                Ok(Some(pool)) => pool,
                Ok(None) => {
                    info!("{} 没有符合条件的池子", candidate.symbol);
                    continue;
                }
                Err(e) => {
                    warn!("⚠️ 查询 {} 的池子失败: {:#}", candidate.symbol, e);
                    continue;
                }
            };
            if self.is_monitored(&pool) {
                continue;
            }

            // 维护工具可能在运行中修改冷却表
            let cooldowns = self.ctx.store.load_cooldowns()?;
            let reservation = match self.scheduler.select(&candidate, &pool, &cooldowns, now_ms()) {
                Some(reservation) => reservation,
                None => continue,
            };

            let wallet = reservation.owner.pubkey().to_string();
            if let Err(e) = self.process_candidate(&candidate, &reservation).await {
                if LpError::is_skip(&e) {
                    info!("⏭️ {} 钱包 {} 池子 {}: {:#}", candidate.symbol, short(&wallet), short(&pool), e);
                } else {
                    error!("❌ {} 钱包 {} 池子 {} 入场失败: {:#}", candidate.symbol, short(&wallet), short(&pool), e);
                }
            }
        }
        Ok(())
    }

    // 兑换投入的SOL，平衡模式只兑换一半
    fn entry_swap_lamports(&self) -> u64 {
        let capital = self.config.capital_lamports();
        match self.config.liquidity.mode {
            LiquidityMode::Balanced => capital / 2,
            LiquidityMode::OneSided => capital,
        }
    }

    // 预检 -> 兑换 -> 存入 -> 启动监控，失败时回滚
    pub async fn process_candidate(&mut self, candidate: &Candidate, reservation: &Reservation) -> Result<()> {
        let Reservation { slot, owner, mint, pool, .. } = reservation;
        let slot = *slot;
        let liquidity = self.ctx.liquidity.clone();
        let swaps = self.ctx.swaps.clone();

        // 兑换前先检查区间，避免兑换后无法存入
        match liquidity.deposit_manager.plan(pool).await {
            Ok(DepositPlan::Ready { .. }) => {}
            Ok(DepositPlan::Skip(reason)) => {
                self.scheduler.release(slot, mint, pool, now_ms());
                return Err(LpError::Skip(reason).into());
            }
            Err(e) => {
                self.scheduler.release(slot, mint, pool, now_ms());
                return Err(e);
            }
        }

        let anchor_amount = if self.config.needs_entry_swap() {
            info!("🔄 {} 兑换 {} lamports SOL", candidate.symbol, self.entry_swap_lamports());
            match swaps
                .swap_and_verify(owner, SOL_MINT, mint, self.entry_swap_lamports())
                .await
            {
                Ok(balance) => balance,
                Err(e) => {
                    self.scheduler.on_swap_failed(slot, mint, self.config.liquidity.anchor, now_ms());
                    if LpError::is_partial_failure(&e) {
                        self.rollback(reservation, true).await;
                    }
                    return Err(e.context("兑换失败"));
                }
            }
        } else {
            self.config.capital_lamports()
        };

        if self.config.needs_entry_swap() && anchor_amount < self.config.scheduler.min_anchor_amount {
            self.scheduler.clear_reuse_stamp(slot, mint);
            self.sweep_stranded(owner, mint).await;
            return Err(LpError::Skip(format!(
                "兑换得到的 {} 数量 {} 低于最小值 {}",
                candidate.symbol, anchor_amount, self.config.scheduler.min_anchor_amount
            ))
            .into());
        }

        match liquidity.deposit_manager.deposit(pool, owner, anchor_amount).await {
            Ok(outcome) => {
                if let Err(e) = self.scheduler.record_occupancy(slot, mint, pool) {
                    error!("❌ 记录钱包占用失败: {:#}", e);
                }
                info!(
                    "✅ {} 入场完成: 仓位 {} 池子 {}",
                    candidate.symbol,
                    short(&outcome.position),
                    short(pool)
                );
                self.spawn_monitor(slot, pool, mint, owner.clone());
                Ok(())
            }
            Err(e) => {
                self.rollback(reservation, LpError::is_partial_failure(&e)).await;
                Err(e)
            }
        }
    }

    // 换回滞留的代币，释放预留；部分失败时额外冷却该代币
    async fn rollback(&mut self, reservation: &Reservation, partial: bool) {
        if self.config.needs_entry_swap() {
            self.sweep_stranded(&reservation.owner, &reservation.mint).await;
        }
        let now = now_ms();
        self.scheduler.release(reservation.slot, &reservation.mint, &reservation.pool, now);

        if partial {
            let until = now + self.config.scheduler.defensive_cooldown_minutes as i64 * MINUTE_MS;
            match self.ctx.store.extend_cooldown(&reservation.mint, until) {
                Ok(_) => warn!(
                    "⚠️ {} 部分失败，冷却 {} 分钟，请人工核对钱包 {}",
                    short(&reservation.mint),
                    self.config.scheduler.defensive_cooldown_minutes,
                    reservation.owner.pubkey()
                ),
                Err(e) => error!("❌ 写入冷却失败: {:#}", e),
            }
        }
    }

    async fn sweep_stranded(&self, owner: &Keypair, mint: &str) {
        let swaps = &self.ctx.swaps;
        let balance = match swaps.chain.token_balance(&owner.pubkey(), mint).await {
            Ok(balance) => balance,
            Err(e) => {
                warn!("⚠️ 查询滞留的 {} 余额失败: {:#}", short(mint), e);
                return;
            }
        };
        if balance > self.config.exit.dust_threshold {
            if let Err(e) = swaps.swap_back_to_sol(owner, mint, balance).await {
                error!("❌ 滞留的 {} 换回SOL失败: {:#}", short(mint), e);
            }
        }
        if let Err(e) = swaps.unwrap_wsol_with_retry(owner).await {
            warn!("⚠️ 解包WSOL失败: {:#}", e);
        }
    }

    fn spawn_monitor(&mut self, slot: usize, pool: &str, mint: &str, owner: Arc<Keypair>) {
        let owner_address = owner.pubkey().to_string();
        let monitor = PositionMonitor::new(self.ctx.clone(), pool, mint, owner);
        let handle = tokio::spawn(monitor.run(slot, self.events_tx.clone()));
        self.registry.insert(
            pool.to_string(),
            MonitorHandle { handle, owner: owner_address },
        );
    }

    // 先中止任务再移除登记，最后释放钱包
    pub fn on_monitor_closed(&mut self, event: MonitorEvent) {
        if let Some(entry) = self.registry.get(&event.pool) {
            entry.handle.abort();
            info!("🔚 池子 {} (钱包 {}) 监控已结束", short(&event.pool), short(&entry.owner));
        }
        self.registry.remove(&event.pool);
        self.scheduler.release_after_close(event.slot, &event.mint, &event.pool, now_ms());
    }

    pub fn drain_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.on_monitor_closed(event);
        }
    }

    // 等待下一条关闭通知，超时返回false
    pub async fn wait_for_event(&mut self, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, self.events_rx.recv()).await {
            Ok(Some(event)) => {
                self.on_monitor_closed(event);
                true
            }
            _ => false,
        }
    }
}
