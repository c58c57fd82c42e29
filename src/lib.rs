pub mod config;
pub mod discovery;
pub mod error;
pub mod liquidity;
pub mod monitoring;
pub mod oracle;
pub mod orchestrator;
pub mod retry;
pub mod scheduler;
pub mod state;
pub mod swap;
pub mod types;
pub mod utils;
pub mod wallet;

pub use config::{Config, ConfigManager};
pub use error::LpError;
pub use liquidity::LiquidityManager;
pub use monitoring::{MonitorContext, PositionMonitor};
pub use orchestrator::Orchestrator;
pub use scheduler::Scheduler;
pub use state::StateStore;
pub use swap::SwapManager;
pub use wallet::WalletManager;
