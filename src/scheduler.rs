use crate::config::SchedulerConfig;
use crate::error::LpError;
use crate::state::CooldownTable;
use crate::types::{short, AnchorSide, Candidate};
use anchor_client::solana_sdk::signature::Keypair;
use anchor_client::solana_sdk::signer::Signer;
use anyhow::Result;
use log::info;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const MINUTE_MS: i64 = 60 * 1000;

// 一个钱包的占用情况，只由调度循环修改
pub struct WalletSlot {
    pub keypair: Arc<Keypair>,
    pub address: String,
    pub used_tokens: HashSet<String>,
    pub last_used: HashMap<String, i64>,
    pub used_base_mint: HashMap<String, HashSet<String>>,  // 代币 -> 池子
    pub active_pools: HashSet<String>,
}

impl WalletSlot {
    pub fn new(keypair: Arc<Keypair>) -> Self {
        let address = keypair.pubkey().to_string();
        Self {
            keypair,
            address,
            used_tokens: HashSet::new(),
            last_used: HashMap::new(),
            used_base_mint: HashMap::new(),
            active_pools: HashSet::new(),
        }
    }

    pub fn pool_count(&self, mint: &str) -> usize {
        self.used_base_mint.get(mint).map_or(0, |pools| pools.len())
    }

    fn reuse_remaining(&self, mint: &str, delay_ms: i64, now: i64) -> i64 {
        self.last_used
            .get(mint)
            .map_or(0, |last| (last + delay_ms - now).max(0))
    }
}

#[derive(Debug, Clone)]
pub struct Reservation {
    pub slot: usize,
    pub owner: Arc<Keypair>,
    pub mint: String,
    pub pool: String,
    pub reused: bool,
}

pub struct Scheduler {
    pub slots: Vec<WalletSlot>,
    pub config: SchedulerConfig,
    pub anchor: AnchorSide,
}

impl Scheduler {
    pub fn new(keypairs: &[Arc<Keypair>], config: &SchedulerConfig, anchor: AnchorSide) -> Self {
        Self {
            slots: keypairs.iter().cloned().map(WalletSlot::new).collect(),
            config: config.clone(),
            anchor,
        }
    }

    fn reuse_delay_ms(&self) -> i64 {
        self.config.reuse_delay_minutes as i64 * MINUTE_MS
    }

    // 为候选代币挑选钱包，找不到时记录最长的阻塞原因
    pub fn select(&mut self, candidate: &Candidate, pool: &str, cooldowns: &CooldownTable, now: i64) -> Option<Reservation> {
        let mint = candidate.mint.as_str();
        if cooldowns.is_active(mint, now) {
            info!(
                "⏳ {} 冷却中，剩余 {} 分钟",
                candidate.symbol,
                cooldowns.remaining_ms(mint, now) / MINUTE_MS
            );
            return None;
        }

        let single_wallet = self.slots.len() == 1;
        let delay_ms = self.reuse_delay_ms();
        let mut longest_block = 0i64;
        let mut chosen: Option<(usize, bool)> = None;

        for (index, slot) in self.slots.iter().enumerate() {
            if self.config.only_one_position_per_wallet && !slot.active_pools.is_empty() {
                continue;
            }
            if slot.pool_count(mint) >= self.config.per_wallet_pool_cap {
                continue;
            }
            // 复用间隔只约束单钱包
            let remaining = if single_wallet { slot.reuse_remaining(mint, delay_ms, now) } else { 0 };
            if remaining > 0 {
                longest_block = longest_block.max(remaining);
                continue;
            }
            if slot.used_tokens.contains(mint) {
                // 用过的代币只在单钱包时允许复用
                if single_wallet {
                    chosen = Some((index, true));
                    break;
                }
                continue;
            }
            chosen = Some((index, false));
            break;
        }

        let (index, reused) = match chosen {
            Some(found) => found,
            None => {
                if longest_block > 0 {
                    info!(
                        "⏳ {} 没有可用钱包，最长等待 {} 分钟",
                        candidate.symbol,
                        (longest_block + MINUTE_MS - 1) / MINUTE_MS
                    );
                } else {
                    info!("⏳ {} 没有可用钱包", candidate.symbol);
                }
                return None;
            }
        };

        let anchor = self.anchor;
        let slot = &mut self.slots[index];
        // 复用和锚定X都立即记录使用时间，锚定Y等兑换结果后再定
        if reused || anchor == AnchorSide::X {
            slot.last_used.insert(mint.to_string(), now);
        }
        info!(
            "👛 钱包 {} 分配给 {}{}",
            short(&slot.address),
            candidate.symbol,
            if reused { " (复用)" } else { "" }
        );

        Some(Reservation {
            slot: index,
            owner: slot.keypair.clone(),
            mint: mint.to_string(),
            pool: pool.to_string(),
            reused,
        })
    }

    pub fn on_swap_failed(&mut self, slot: usize, mint: &str, anchor: AnchorSide, now: i64) {
        if let Some(slot) = self.slots.get_mut(slot) {
            let stamp = match anchor {
                AnchorSide::X => now,
                AnchorSide::Y => 0,
            };
            slot.last_used.insert(mint.to_string(), stamp);
        }
    }

    // 兑换数量太少时清除使用时间
    pub fn clear_reuse_stamp(&mut self, slot: usize, mint: &str) {
        if let Some(slot) = self.slots.get_mut(slot) {
            slot.last_used.insert(mint.to_string(), 0);
        }
    }

    pub fn record_occupancy(&mut self, slot: usize, mint: &str, pool: &str) -> Result<()> {
        let cap = self.config.per_wallet_pool_cap;
        let slot = self
            .slots
            .get_mut(slot)
            .ok_or_else(|| LpError::InvariantViolation(format!("钱包序号 {} 不存在", slot)))?;

        let pools = slot.used_base_mint.entry(mint.to_string()).or_default();
        if !pools.contains(pool) && pools.len() >= cap {
            return Err(LpError::InvariantViolation(format!(
                "钱包 {} 的 {} 已达到 {} 个池子上限",
                short(&slot.address),
                short(mint),
                cap
            ))
            .into());
        }
        pools.insert(pool.to_string());
        slot.used_tokens.insert(mint.to_string());
        slot.active_pools.insert(pool.to_string());
        Ok(())
    }

    fn remove_pool(slot: &mut WalletSlot, mint: &str, pool: &str) {
        if let Some(pools) = slot.used_base_mint.get_mut(mint) {
            pools.remove(pool);
            if pools.is_empty() {
                slot.used_base_mint.remove(mint);
            }
        }
        slot.active_pools.remove(pool);
    }

    // 入场失败后回滚
    pub fn release(&mut self, slot: usize, mint: &str, pool: &str, now: i64) {
        if let Some(slot) = self.slots.get_mut(slot) {
            slot.used_tokens.remove(mint);
            Self::remove_pool(slot, mint, pool);
            slot.last_used.insert(mint.to_string(), now);
        }
    }

    // 监控报告仓位关闭后清理，钱包可以再次使用该代币
    pub fn release_after_close(&mut self, slot: usize, mint: &str, pool: &str, now: i64) {
        if let Some(slot) = self.slots.get_mut(slot) {
            slot.used_tokens.remove(mint);
            Self::remove_pool(slot, mint, pool);
            slot.last_used.insert(mint.to_string(), now);
        }
    }

    pub fn slot_of(&self, owner: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.address == owner)
    }
}
