use crate::types::{AnchorSide, LiquidityMode, StrategyKind, LAMPORTS_PER_SOL};
use anchor_client::Cluster;
use anyhow::*;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

pub use anyhow::Result;  // 使用anyhow的Result类型

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub rpc_url: String,
    pub capital_sol: f64,       // 每个仓位投入的SOL
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,     // 负数，例如 -5
    pub state_dir: String,
    pub liquidity: LiquidityConfig,
    pub scheduler: SchedulerConfig,
    pub exit: ExitConfig,
    pub timing: TimingConfig,
    pub discovery: DiscoveryFilters,
    pub endpoints: Endpoints,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LiquidityConfig {
    pub mode: LiquidityMode,
    pub anchor: AnchorSide,
    pub strategy: StrategyKind,
    pub half_width_bins: i32,
    pub deposit_slippage_bps: u16,
    pub swap_slippage_bps: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub per_wallet_pool_cap: usize,         // 每个钱包同一代币最多几个池子
    pub reuse_delay_minutes: u64,           // 单钱包重复使用同一代币的间隔
    pub only_one_position_per_wallet: bool,
    pub defensive_cooldown_minutes: u64,    // 部分失败后的代币冷却
    pub min_anchor_amount: u64,             // 兑换得到的代币少于此值不加流动性
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExitConfig {
    pub out_of_range_timeout_minutes: u64,
    pub take_profit_cooldown_hours: u64,
    pub loss_cooldown_hours: u64,
    pub max_consecutive_losses: u32,
    pub dust_threshold: u64,
    pub max_empty_ticks: u32,
}

// 所有间隔均为毫秒
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimingConfig {
    pub scan_interval_ms: u64,
    pub error_backoff_ms: u64,
    pub monitor_tick_ms: u64,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub swap_balance_polls: u32,
    pub swap_balance_interval_ms: u64,
    pub deposit_verify_polls: u32,
    pub deposit_verify_interval_ms: u64,
    pub exit_balance_polls: u32,
    pub exit_balance_interval_ms: u64,
    pub wsol_sweep_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscoveryFilters {
    pub timeframe: String,
    pub min_volume: f64,
    pub min_mcap: f64,
    pub max_mcap: f64,
    pub min_age_hours: f64,
    pub max_age_hours: f64,
    pub min_organic_score: f64,
    pub bin_steps: Vec<u16>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Endpoints {
    pub jupiter_swap_api: String,
    pub jupiter_price_api: String,
    pub discovery_api: String,
    pub meteora_api: String,
    pub dlmm_bridge: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
            capital_sol: 0.01,
            take_profit_pct: 10.0,
            stop_loss_pct: -5.0,
            state_dir: "./data".to_string(),
            liquidity: LiquidityConfig::default(),
            scheduler: SchedulerConfig::default(),
            exit: ExitConfig::default(),
            timing: TimingConfig::default(),
            discovery: DiscoveryFilters::default(),
            endpoints: Endpoints::default(),
        }
    }
}

impl Default for LiquidityConfig {
    fn default() -> Self {
        Self {
            mode: LiquidityMode::Balanced,
            anchor: AnchorSide::X,
            strategy: StrategyKind::Spot,
            half_width_bins: 34,
            deposit_slippage_bps: 300, // 3%
            swap_slippage_bps: 100,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            per_wallet_pool_cap: 1,
            reuse_delay_minutes: 20,
            only_one_position_per_wallet: true,
            defensive_cooldown_minutes: 30,
            min_anchor_amount: 16_000,
        }
    }
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            out_of_range_timeout_minutes: 10,
            take_profit_cooldown_hours: 3,
            loss_cooldown_hours: 24,
            max_consecutive_losses: 2,
            dust_threshold: 1_000,
            max_empty_ticks: 30,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: 60_000,
            error_backoff_ms: 10_000,
            monitor_tick_ms: 10_000,
            max_attempts: 3,
            retry_backoff_ms: 2_000,
            swap_balance_polls: 10,
            swap_balance_interval_ms: 1_500,
            deposit_verify_polls: 5,
            deposit_verify_interval_ms: 2_000,
            exit_balance_polls: 10,
            exit_balance_interval_ms: 2_000,
            wsol_sweep_interval_ms: 60_000,
        }
    }
}

impl TimingConfig {
    // 所有等待为零，次数不变
    pub fn immediate() -> Self {
        Self {
            scan_interval_ms: 0,
            error_backoff_ms: 0,
            monitor_tick_ms: 1,
            retry_backoff_ms: 0,
            swap_balance_interval_ms: 0,
            deposit_verify_interval_ms: 0,
            exit_balance_interval_ms: 0,
            wsol_sweep_interval_ms: 1,
            ..Self::default()
        }
    }
}

impl Default for DiscoveryFilters {
    fn default() -> Self {
        Self {
            timeframe: "5m".to_string(),
            min_volume: 1_000_000.0,
            min_mcap: 1_000_000.0,
            max_mcap: 100_000_000.0,
            min_age_hours: 1.0,
            max_age_hours: 12.0,
            min_organic_score: 75.0,
            bin_steps: vec![80, 100, 125, 250],
        }
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            jupiter_swap_api: "https://quote-api.jup.ag/v6".to_string(),
            jupiter_price_api: "https://api.jup.ag/price/v2".to_string(),
            discovery_api: "https://datapi.jup.ag/v1".to_string(),
            meteora_api: "https://dlmm-api.meteora.ag".to_string(),
            dlmm_bridge: "http://127.0.0.1:8787".to_string(),
        }
    }
}

impl Config {
    pub fn capital_lamports(&self) -> u64 {
        (self.capital_sol * LAMPORTS_PER_SOL as f64).floor() as u64
    }

    pub fn state_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.state_dir).as_ref())
    }

    // 单边Y不需要先兑换
    pub fn needs_entry_swap(&self) -> bool {
        !(self.liquidity.mode == LiquidityMode::OneSided && self.liquidity.anchor == AnchorSide::Y)
    }

    // 统一参数，检查明显错误的输入
    pub fn validate(&mut self) -> Result<()> {
        if !(self.capital_sol > 0.0) {
            bail!("投入金额必须为正数");
        }
        if !(self.take_profit_pct > 0.0) {
            bail!("止盈百分比必须为正数");
        }
        self.stop_loss_pct = -self.stop_loss_pct.abs();
        if self.liquidity.half_width_bins <= 0 {
            bail!("bin宽度必须为正数");
        }
        if self.scheduler.per_wallet_pool_cap == 0 {
            bail!("每个钱包的池子上限至少为1");
        }
        if self.timing.max_attempts == 0 {
            bail!("重试次数至少为1");
        }
        if self.discovery.min_mcap > self.discovery.max_mcap {
            bail!("最小市值不能大于最大市值");
        }
        Ok(())
    }
}

// 启动时加载，运行期间只读
pub struct ConfigManager {
    pub config: Arc<Config>,
    pub path: PathBuf,
}

impl ConfigManager {
    // 读取配置文件，不存在时写入默认配置
    pub fn load_or_create(path: &str) -> Result<Self> {
        let path = PathBuf::from(shellexpand::tilde(path).as_ref());
        let mut config = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("无法读取配置文件: {}", path.display()))?;
            serde_json::from_str::<Config>(&raw)
                .with_context(|| format!("配置文件格式错误: {}", path.display()))?
        } else {
            let config = Config::default();
            Self::save(&path, &config)?;
            info!("已写入默认配置: {}", path.display());
            config
        };
        config.validate()?;
        Ok(Self { config: Arc::new(config), path })
    }

    pub fn from_config(mut config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config: Arc::new(config), path: PathBuf::new() })
    }

    pub fn save(path: &Path, config: &Config) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        fs::write(path, serde_json::to_string_pretty(config)?)?;
        Ok(())
    }

    // 获取当前配置
    pub fn get_config(&self) -> Arc<Config> {
        self.config.clone()
    }

    pub fn get_cluster(&self) -> Result<Cluster> {
        Cluster::from_str(&self.config.rpc_url).map_err(|_| Error::msg("无效的RPC URL"))
    }

    // 启动时打印配置
    pub fn log_summary(&self) {
        let c = &self.config;
        info!("⚙️ 配置:");
        info!("🔹 投入       : {} SOL", c.capital_sol);
        info!("🔹 止盈       : {}%", c.take_profit_pct);
        info!("🔹 止损       : {}%", c.stop_loss_pct);
        info!("🔹 模式       : {:?}", c.liquidity.mode);
        if c.liquidity.mode == LiquidityMode::OneSided {
            info!("🔹 锚定代币   : {:?}", c.liquidity.anchor);
        }
        info!("🔹 策略       : {:?}", c.liquidity.strategy);
        info!("🔹 最小成交量 : {}", c.discovery.min_volume);
        info!("🔹 市值区间   : {} - {}", c.discovery.min_mcap, c.discovery.max_mcap);
        info!("🔹 代币年龄   : {} - {} 小时", c.discovery.min_age_hours, c.discovery.max_age_hours);
        info!("🔹 单钱包单仓位: {}", c.scheduler.only_one_position_per_wallet);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_normalizes_stop_loss() {
        let mut config = Config { stop_loss_pct: 5.0, ..Config::default() };
        config.validate().unwrap();
        assert_eq!(config.stop_loss_pct, -5.0);
    }

    #[test]
    fn test_validate_rejects_zero_capital() {
        let mut config = Config { capital_sol: 0.0, ..Config::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"capital_sol": 0.5, "liquidity": {"mode": "OneSided", "anchor": "Y"}}"#).unwrap();
        assert_eq!(config.capital_lamports(), 500_000_000);
        assert_eq!(config.liquidity.half_width_bins, 34);
        assert!(!config.needs_entry_swap());
        assert_eq!(config.scheduler.reuse_delay_minutes, 20);
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let manager = ConfigManager::load_or_create(path.to_str().unwrap()).unwrap();
        assert!(path.exists());
        assert_eq!(manager.get_config().take_profit_pct, 10.0);
    }
}
