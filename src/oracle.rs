use crate::error::LpError;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// 代币美元价格
#[async_trait]
pub trait PriceOracle: Send + Sync {
    // 只返回查到价格的代币
    async fn price_of(&self, mints: &[String]) -> Result<HashMap<String, f64>>;
}

pub struct JupiterPriceOracle {
    pub http: Client,
    pub base_url: String,
}

impl JupiterPriceOracle {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_string() })
    }
}

// {"data": {"<mint>": {"id": "...", "price": "1.23"}}}
pub fn parse_prices(raw: &Value) -> HashMap<String, f64> {
    let mut prices = HashMap::new();
    if let Some(data) = raw["data"].as_object() {
        for (mint, entry) in data {
            let price = match &entry["price"] {
                Value::String(s) => s.parse::<f64>().ok(),
                Value::Number(n) => n.as_f64(),
                _ => None,
            };
            if let Some(price) = price.filter(|p| p.is_finite() && *p > 0.0) {
                prices.insert(mint.clone(), price);
            }
        }
    }
    prices
}

#[async_trait]
impl PriceOracle for JupiterPriceOracle {
    async fn price_of(&self, mints: &[String]) -> Result<HashMap<String, f64>> {
        let raw = self
            .http
            .get(&self.base_url)
            .query(&[("ids", mints.join(","))])
            .send()
            .await
            .map_err(LpError::from)?
            .json::<Value>()
            .await
            .map_err(LpError::from)?;
        Ok(parse_prices(&raw))
    }
}
