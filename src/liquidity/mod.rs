mod bin_range;
mod deposit;
mod pool;
mod position;
mod withdraw;

pub use bin_range::*;
pub use deposit::*;
pub use pool::*;
pub use position::*;
pub use withdraw::*;

use crate::config::Config;
use std::sync::Arc;

pub struct LiquidityManager {
    pub pool_client: Arc<dyn AmmPoolClient>,
    pub deposit_manager: Depositor,
    pub withdraw_manager: Withdraw,
}

impl LiquidityManager {
    pub fn new(pool_client: Arc<dyn AmmPoolClient>, config: &Config) -> Self {
        let deposit_manager = Depositor::new(pool_client.clone(), &config.liquidity, &config.timing);
        let withdraw_manager = Withdraw::new(pool_client.clone(), &config.timing);

        Self {
            pool_client,
            deposit_manager,
            withdraw_manager,
        }
    }
}
