use crate::error::LpError;
use crate::types::{AnchorSide, BinRange, StrategyKind};
use crate::utils::{decode_transaction, sign_transaction};
use crate::wallet::ChainClient;
use anchor_client::solana_sdk::pubkey::Pubkey;
use anchor_client::solana_sdk::signature::{Keypair, Signature};
use anchor_client::solana_sdk::signer::Signer;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolInfo {
    pub address: String,
    pub mint_x: String,
    pub mint_y: String,
    pub bin_step: u16,
    pub decimals_x: u8,
    pub decimals_y: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveBin {
    pub bin_id: i32,
    pub price: f64,  // 每个X值多少Y（已按小数位调整）
}

// 钱包在某个池子里的一个链上仓位，数量均为原始单位
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerPosition {
    pub position: String,
    pub lower_bin_id: i32,
    pub upper_bin_id: i32,
    pub amount_x: u64,
    pub amount_y: u64,
    pub fee_x: u64,
    pub fee_y: u64,
}

impl OwnerPosition {
    pub fn range(&self) -> BinRange {
        BinRange::new(self.lower_bin_id, self.upper_bin_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DepositRequest {
    pub pool: String,
    pub range: BinRange,
    pub amount_x: u64,
    pub amount_y: u64,
    pub strategy: StrategyKind,
    pub slippage_bps: u16,
}

/// DLMM池子的读写操作。交易由实现方构建，签名始终使用本地密钥
#[async_trait]
pub trait AmmPoolClient: Send + Sync {
    async fn pool_info(&self, pool: &str) -> Result<PoolInfo>;

    async fn get_active_bin(&self, pool: &str) -> Result<ActiveBin>;

    // 按策略分布，给定一侧数量时另一侧需要的数量
    async fn compute_counter_amount(
        &self,
        pool: &str,
        active_bin: i32,
        range: BinRange,
        anchor_amount: u64,
        anchor: AnchorSide,
        strategy: StrategyKind,
    ) -> Result<u64>;

    // 新建仓位并存入
    async fn deposit_liquidity(&self, owner: &Keypair, request: &DepositRequest) -> Result<Signature>;

    // 全部取出、领取手续费并关闭仓位
    async fn withdraw_liquidity(&self, owner: &Keypair, pool: &str, position: &str) -> Result<Vec<Signature>>;

    async fn list_owner_positions(&self, pool: &str, owner: &Pubkey) -> Result<Vec<OwnerPosition>>;

    // 区间内已初始化的bin
    async fn list_initialized_bins(&self, pool: &str, range: BinRange) -> Result<Vec<i32>>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BridgeTransactions {
    transactions: Vec<String>,
    #[serde(default)]
    last_valid_block_height: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct BridgeAmount {
    amount: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BridgeBins {
    bin_ids: Vec<i32>,
}

// 通过本地DLMM桥接服务构建交易，桥接服务不持有私钥
pub struct SidecarPoolClient {
    pub http: Client,
    pub base_url: String,
    pub chain: Arc<dyn ChainClient>,
}

impl SidecarPoolClient {
    pub fn new(base_url: &str, chain: Arc<dyn ChainClient>) -> Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            chain,
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.get(&url).send().await.map_err(LpError::from)?;
        let response = response.error_for_status().map_err(LpError::from)?;
        Ok(response.json::<T>().await.map_err(LpError::from)?)
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: serde_json::Value) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.post(&url).json(&body).send().await.map_err(LpError::from)?;
        let response = response.error_for_status().map_err(LpError::from)?;
        Ok(response.json::<T>().await.map_err(LpError::from)?)
    }

    // 依次签名发送，任何一笔失败即返回
    async fn sign_and_send(&self, bundle: BridgeTransactions, signers: &[&Keypair]) -> Result<Vec<Signature>> {
        if bundle.transactions.is_empty() {
            return Err(LpError::InvariantViolation("桥接服务未返回交易".to_string()).into());
        }
        let mut signatures = vec![];
        for encoded in &bundle.transactions {
            let mut tx = decode_transaction(encoded)?;
            for signer in signers {
                tx = sign_transaction(tx, signer)?;
            }
            let signature = self.chain.send_and_confirm(&tx, bundle.last_valid_block_height).await?;
            signatures.push(signature);
        }
        Ok(signatures)
    }
}

fn strategy_name(strategy: StrategyKind) -> &'static str {
    match strategy {
        StrategyKind::Spot => "spot",
        StrategyKind::BidAsk => "bidAsk",
        StrategyKind::Curve => "curve",
    }
}

#[async_trait]
impl AmmPoolClient for SidecarPoolClient {
    async fn pool_info(&self, pool: &str) -> Result<PoolInfo> {
        self.get(&format!("/pools/{}", pool)).await
    }

    async fn get_active_bin(&self, pool: &str) -> Result<ActiveBin> {
        self.get(&format!("/pools/{}/active-bin", pool)).await
    }

    async fn compute_counter_amount(
        &self,
        pool: &str,
        active_bin: i32,
        range: BinRange,
        anchor_amount: u64,
        anchor: AnchorSide,
        strategy: StrategyKind,
    ) -> Result<u64> {
        let body = json!({
            "activeBinId": active_bin,
            "lowerBinId": range.lower_bin_id,
            "upperBinId": range.upper_bin_id,
            "amount": anchor_amount,
            "anchor": anchor,
            "strategy": strategy_name(strategy),
        });
        let result: BridgeAmount = self.post(&format!("/pools/{}/counter-amount", pool), body).await?;
        Ok(result.amount)
    }

    async fn deposit_liquidity(&self, owner: &Keypair, request: &DepositRequest) -> Result<Signature> {
        // 仓位账户由本地生成，与钱包一起签名
        let position = Keypair::new();
        let body = json!({
            "owner": owner.pubkey().to_string(),
            "position": position.pubkey().to_string(),
            "lowerBinId": request.range.lower_bin_id,
            "upperBinId": request.range.upper_bin_id,
            "amountX": request.amount_x,
            "amountY": request.amount_y,
            "strategy": strategy_name(request.strategy),
            "slippageBps": request.slippage_bps,
        });
        let bundle: BridgeTransactions = self.post(&format!("/pools/{}/deposit", request.pool), body).await?;
        let signatures = self.sign_and_send(bundle, &[owner, &position]).await?;
        signatures
            .last()
            .copied()
            .ok_or_else(|| LpError::InvariantViolation("存入没有返回签名".to_string()).into())
    }

    async fn withdraw_liquidity(&self, owner: &Keypair, pool: &str, position: &str) -> Result<Vec<Signature>> {
        let body = json!({
            "owner": owner.pubkey().to_string(),
            "position": position,
            "bps": crate::types::FULL_BPS,
            "claimAndClose": true,
        });
        let bundle: BridgeTransactions = self.post(&format!("/pools/{}/withdraw", pool), body).await?;
        self.sign_and_send(bundle, &[owner]).await
    }

    async fn list_owner_positions(&self, pool: &str, owner: &Pubkey) -> Result<Vec<OwnerPosition>> {
        self.get(&format!("/pools/{}/positions/{}", pool, owner)).await
    }

    async fn list_initialized_bins(&self, pool: &str, range: BinRange) -> Result<Vec<i32>> {
        let result: BridgeBins = self
            .get(&format!(
                "/pools/{}/bins?lower={}&upper={}",
                pool, range.lower_bin_id, range.upper_bin_id
            ))
            .await?;
        Ok(result.bin_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_position_parses_bridge_json() {
        let raw = r#"[{"position":"Pos1","lowerBinId":-34,"upperBinId":34,"amountX":10,"amountY":20,"feeX":1,"feeY":2}]"#;
        let positions: Vec<OwnerPosition> = serde_json::from_str(raw).unwrap();
        assert_eq!(positions[0].range(), BinRange::new(-34, 34));
        assert_eq!(positions[0].fee_y, 2);
    }

    #[test]
    fn test_strategy_names_match_bridge() {
        assert_eq!(strategy_name(StrategyKind::BidAsk), "bidAsk");
        assert_eq!(strategy_name(StrategyKind::Spot), "spot");
    }
}
