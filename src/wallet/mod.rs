mod balance;
mod reader;
mod rpc;

pub use balance::*;
pub use reader::*;
pub use rpc::*;

use anchor_client::solana_sdk::signature::Keypair;
use anchor_client::solana_sdk::signer::Signer;
use anyhow::*;
use log::{info, warn};
use std::sync::Arc;

// 启动时加载的钱包列表，运行期间不变
pub struct WalletManager {
    pub keypairs: Vec<Arc<Keypair>>,
}

impl WalletManager {
    pub fn new(keypairs: Vec<Keypair>) -> Self {
        Self {
            keypairs: keypairs.into_iter().map(Arc::new).collect(),
        }
    }

    // 从钱包列表文件加载
    pub fn load(path: &str) -> Result<Self> {
        let keypairs = read_roster(path)?;
        if keypairs.is_empty() {
            bail!("钱包列表为空: {}", path);
        }
        let manager = Self::new(keypairs);
        info!("👛 已加载 {} 个钱包", manager.len());
        Ok(manager)
    }

    pub fn len(&self) -> usize {
        self.keypairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypairs.is_empty()
    }

    // 获取所有钱包公钥地址
    pub fn addresses(&self) -> Vec<String> {
        self.keypairs.iter().map(|k| k.pubkey().to_string()).collect()
    }

    // 启动时打印每个钱包的SOL余额
    pub async fn report_balances(&self, chain: &dyn ChainClient) {
        for keypair in &self.keypairs {
            match chain.sol_balance(&keypair.pubkey()).await {
                std::result::Result::Ok(lamports) => info!(
                    "💰 {} 余额: {:.4} SOL",
                    keypair.pubkey(),
                    lamports as f64 / crate::types::LAMPORTS_PER_SOL as f64
                ),
                Err(e) => warn!("⚠️ 获取 {} 余额失败: {:#}", keypair.pubkey(), e),
            }
        }
    }
}

#[cfg(test)]
mod tests;
