use anyhow::Result;
use clap::Parser;
use log::info;
use lp_autopilot::discovery::JupiterDiscovery;
use lp_autopilot::liquidity::SidecarPoolClient;
use lp_autopilot::oracle::JupiterPriceOracle;
use lp_autopilot::swap::JupiterClient;
use lp_autopilot::utils::PendingSet;
use lp_autopilot::wallet::{ChainClient, RpcChain};
use lp_autopilot::*;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "lp-autopilot", about = "DLMM多钱包流动性仓位自动管理")]
struct Args {
    /// 配置文件，不存在时写入默认配置
    #[arg(long, default_value = "config.json")]
    config: String,

    /// 钱包列表（JSON字符串数组）
    #[arg(long, default_value = "wallets.json")]
    wallets: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config_manager = ConfigManager::load_or_create(&args.config)?;
    config_manager.log_summary();
    config_manager.get_cluster()?;
    let config = config_manager.get_config();

    let wallets = Arc::new(WalletManager::load(&args.wallets)?);
    let store = Arc::new(StateStore::open(&config.state_path())?);

    let chain: Arc<dyn ChainClient> = Arc::new(RpcChain::new(&config.rpc_url));
    let pool_client = Arc::new(SidecarPoolClient::new(&config.endpoints.dlmm_bridge, chain.clone())?);
    let aggregator = Arc::new(JupiterClient::new(&config.endpoints.jupiter_swap_api)?);
    let oracle = Arc::new(JupiterPriceOracle::new(&config.endpoints.jupiter_price_api)?);
    let source = Arc::new(JupiterDiscovery::new(&config.endpoints, &config.discovery)?);

    let ctx = Arc::new(MonitorContext {
        config: config.clone(),
        store,
        liquidity: Arc::new(LiquidityManager::new(pool_client, &config)),
        swaps: Arc::new(SwapManager::new(
            aggregator,
            chain,
            &config.timing,
            config.liquidity.swap_slippage_bps,
        )),
        oracle,
        pending_exits: PendingSet::new(),
    });

    let orchestrator = Orchestrator::new(ctx, source, wallets);
    info!("🚀 启动，RPC: {}", config.rpc_url);

    tokio::select! {
        result = orchestrator.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("收到退出信号，程序退出"),
    }
    Ok(())
}
