use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use lp_autopilot::utils::now_ms;
use lp_autopilot::{ConfigManager, StateStore};

const HOUR_MS: i64 = 60 * 60 * 1000;

// 运行中的监控会在下一次检查时退出被标记的仓位
#[derive(Parser, Debug)]
#[command(name = "force-remove", about = "标记所有打开的仓位为强制移除")]
struct Args {
    #[arg(long, default_value = "config.json")]
    config: String,

    /// 同时给这些仓位的代币加冷却
    #[arg(long)]
    cooldown: bool,

    #[arg(long, default_value_t = 7)]
    cooldown_hours: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = ConfigManager::load_or_create(&args.config)?.get_config();
    let store = StateStore::open(&config.state_path())?;

    let cooldown_until = args
        .cooldown
        .then(|| now_ms() + args.cooldown_hours as i64 * HOUR_MS);
    let count = store.force_remove_open(cooldown_until)?;

    if count > 0 {
        info!(
            "✅ {} 个打开的仓位已标记为强制移除{}",
            count,
            if args.cooldown {
                format!("，代币冷却 {} 小时", args.cooldown_hours)
            } else {
                String::new()
            }
        );
    } else {
        warn!("⚠️ 没有需要处理的打开仓位");
    }
    Ok(())
}
