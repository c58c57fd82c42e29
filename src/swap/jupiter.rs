use crate::error::LpError;
use crate::utils::{decode_transaction, sign_transaction};
use crate::wallet::ChainClient;
use anchor_client::solana_sdk::pubkey::Pubkey;
use anchor_client::solana_sdk::signature::{Keypair, Signature};
use anchor_client::solana_sdk::signer::Signer;
use anyhow::Result;
use async_trait::async_trait;
use log::{info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const HTTP_TIMEOUT_SECS: u64 = 20;

// 报价原文保留下来，构建交易时原样提交
#[derive(Debug, Clone)]
pub struct Quote {
    pub in_amount: u64,
    pub out_amount: u64,
    pub raw: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapPayload {
    pub swap_transaction: String,
    #[serde(default)]
    pub last_valid_block_height: Option<u64>,
}

/// 聚合器：报价并返回未签名的序列化交易
#[async_trait]
pub trait SwapAggregator: Send + Sync {
    async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        slippage_bps: u16,
        legacy: bool,
    ) -> Result<Quote>;

    async fn build_swap_transaction(&self, quote: &Quote, user: &Pubkey, legacy: bool) -> Result<SwapPayload>;
}

pub struct JupiterClient {
    pub http: Client,
    pub base_url: String,
}

impl JupiterClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_string() })
    }
}

fn parse_amount_field(raw: &Value, field: &str) -> Option<u64> {
    match &raw[field] {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

pub fn parse_quote(raw: Value) -> Result<Quote> {
    if let Some(err) = raw.get("error") {
        return Err(LpError::InvariantViolation(format!("报价返回错误: {}", err)).into());
    }
    let out_amount = parse_amount_field(&raw, "outAmount")
        .ok_or_else(|| LpError::InvariantViolation("报价缺少outAmount".to_string()))?;
    let in_amount = parse_amount_field(&raw, "inAmount").unwrap_or(0);
    Ok(Quote { in_amount, out_amount, raw })
}

#[async_trait]
impl SwapAggregator for JupiterClient {
    async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        slippage_bps: u16,
        legacy: bool,
    ) -> Result<Quote> {
        let url = format!("{}/quote", self.base_url);
        let mut params = vec![
            ("inputMint", input_mint.to_string()),
            ("outputMint", output_mint.to_string()),
            ("amount", amount.to_string()),
            ("slippageBps", slippage_bps.to_string()),
        ];
        if legacy {
            params.push(("asLegacyTransaction", "true".to_string()));
        }

        let raw = self
            .http
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(LpError::from)?
            .json::<Value>()
            .await
            .map_err(LpError::from)?;
        parse_quote(raw)
    }

    async fn build_swap_transaction(&self, quote: &Quote, user: &Pubkey, legacy: bool) -> Result<SwapPayload> {
        let url = format!("{}/swap", self.base_url);
        let body = json!({
            "quoteResponse": quote.raw,
            "userPublicKey": user.to_string(),
            "wrapAndUnwrapSol": true,
            "dynamicComputeUnitLimit": true,
            "asLegacyTransaction": legacy,
        });

        let raw = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(LpError::from)?
            .json::<Value>()
            .await
            .map_err(LpError::from)?;

        serde_json::from_value::<SwapPayload>(raw)
            .map_err(|e| LpError::InvariantViolation(format!("缺少交易载荷: {}", e)).into())
    }
}

// 单次兑换：报价 -> 构建 -> 本地签名 -> 发送确认
pub struct SwapExecutor {
    pub aggregator: Arc<dyn SwapAggregator>,
    pub chain: Arc<dyn ChainClient>,
}

impl SwapExecutor {
    pub fn new(aggregator: Arc<dyn SwapAggregator>, chain: Arc<dyn ChainClient>) -> Self {
        Self { aggregator, chain }
    }

    // 失败时改用legacy交易再试一次，第二次失败直接返回
    pub async fn swap(
        &self,
        owner: &Keypair,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        slippage_bps: u16,
    ) -> Result<Signature> {
        match self.swap_once(owner, input_mint, output_mint, amount, slippage_bps, false).await {
            Ok(signature) => Ok(signature),
            Err(e) => {
                warn!("⚠️ 兑换失败，改用legacy交易重试: {:#}", e);
                self.swap_once(owner, input_mint, output_mint, amount, slippage_bps, true).await
            }
        }
    }

    async fn swap_once(
        &self,
        owner: &Keypair,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        slippage_bps: u16,
        legacy: bool,
    ) -> Result<Signature> {
        let quote = self
            .aggregator
            .quote(input_mint, output_mint, amount, slippage_bps, legacy)
            .await?;
        let payload = self
            .aggregator
            .build_swap_transaction(&quote, &owner.pubkey(), legacy)
            .await?;

        let tx = sign_transaction(decode_transaction(&payload.swap_transaction)?, owner)?;
        let signature = self.chain.send_and_confirm(&tx, payload.last_valid_block_height).await?;
        if signature == Signature::default() {
            return Err(LpError::InvariantViolation("兑换返回空签名".to_string()).into());
        }

        info!(
            "🔄 兑换成功: {} {} -> {} (预计 {}) {}",
            amount,
            crate::types::short(input_mint),
            crate::types::short(output_mint),
            quote.out_amount,
            signature
        );
        Ok(signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quote_reads_string_amounts() {
        let quote = parse_quote(json!({"inAmount": "1000", "outAmount": "2500", "routePlan": []})).unwrap();
        assert_eq!(quote.in_amount, 1000);
        assert_eq!(quote.out_amount, 2500);
    }

    #[test]
    fn test_parse_quote_without_amount_is_invariant_violation() {
        let err = parse_quote(json!({"routePlan": []})).unwrap_err();
        assert!(matches!(err.downcast_ref::<LpError>(), Some(LpError::InvariantViolation(_))));
        let err = parse_quote(json!({"error": "no route"})).unwrap_err();
        assert!(matches!(err.downcast_ref::<LpError>(), Some(LpError::InvariantViolation(_))));
    }

    #[test]
    fn test_swap_payload_deserializes() {
        let payload: SwapPayload =
            serde_json::from_value(json!({"swapTransaction": "AQID", "lastValidBlockHeight": 42})).unwrap();
        assert_eq!(payload.swap_transaction, "AQID");
        assert_eq!(payload.last_valid_block_height, Some(42));
    }
}
