use crate::config::{DiscoveryFilters, Endpoints};
use crate::error::LpError;
use crate::types::{Candidate, SOL_MINT};
use crate::utils::now_ms;
use anyhow::Result;
use async_trait::async_trait;
use chrono::DateTime;
use log::{debug, info};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const HOUR_MS: f64 = 60.0 * 60.0 * 1000.0;

/// 候选代币来源
#[async_trait]
pub trait CandidateSource: Send + Sync {
    // 按分数从高到低
    async fn fetch_candidates(&self) -> Result<Vec<Candidate>>;

    // 为候选代币找到要使用的池子
    async fn resolve_pool(&self, candidate: &Candidate) -> Result<Option<String>>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseAsset {
    pub id: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub mcap: Option<f64>,
    #[serde(default)]
    pub organic_score: Option<f64>,
    #[serde(default)]
    pub organic_score_label: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopPool {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub quote_asset: String,
    #[serde(default)]
    pub volume24h: Option<f64>,
    pub base_asset: BaseAsset,
}

#[derive(Debug, Deserialize)]
struct TopPoolsResponse {
    #[serde(default)]
    pools: Vec<TopPool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeteoraPair {
    pub address: String,
    pub mint_y: String,
    pub bin_step: u16,
    #[serde(default)]
    pub trade_volume_24h: f64,
}

#[derive(Debug, Deserialize)]
struct PairGroup {
    #[serde(default)]
    pairs: Vec<MeteoraPair>,
}

#[derive(Debug, Deserialize)]
struct PairGroupsResponse {
    #[serde(default)]
    groups: Vec<PairGroup>,
}

// 按成交量、市值、年龄和有机分过滤，只保留SOL报价的池子
pub fn filter_top_pools(pools: Vec<TopPool>, filters: &DiscoveryFilters, now: i64) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = pools
        .into_iter()
        .filter(|p| {
            let age_hours = p
                .created_at
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| (now - t.timestamp_millis()) as f64 / HOUR_MS);
            let age_ok = age_hours.map_or(false, |h| h >= filters.min_age_hours && h <= filters.max_age_hours);
            let mcap = p.base_asset.mcap.unwrap_or(0.0);
            let score = p.base_asset.organic_score.unwrap_or(0.0);
            let label = p.base_asset.organic_score_label.as_deref().unwrap_or("").to_lowercase();
            let score_ok = (label == "medium" || label == "high") && score >= filters.min_organic_score;

            p.quote_asset == SOL_MINT
                && p.volume24h.unwrap_or(0.0) >= filters.min_volume
                && age_ok
                && mcap >= filters.min_mcap
                && mcap <= filters.max_mcap
                && score_ok
        })
        .map(|p| Candidate {
            mint: p.base_asset.id,
            symbol: p.base_asset.symbol,
            score: p.base_asset.organic_score.unwrap_or(0.0),
            pool_address: None,
        })
        .collect();
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    candidates
}

// 允许的bin步长里成交量最高的SOL池
pub fn best_pair(pairs: &[MeteoraPair], bin_steps: &[u16]) -> Option<String> {
    pairs
        .iter()
        .filter(|p| bin_steps.contains(&p.bin_step) && p.mint_y == SOL_MINT && p.trade_volume_24h > 0.0)
        .max_by(|a, b| {
            a.trade_volume_24h
                .partial_cmp(&b.trade_volume_24h)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|p| p.address.clone())
}

pub struct JupiterDiscovery {
    pub http: Client,
    pub endpoints: Endpoints,
    pub filters: DiscoveryFilters,
}

impl JupiterDiscovery {
    pub fn new(endpoints: &Endpoints, filters: &DiscoveryFilters) -> Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self {
            http,
            endpoints: endpoints.clone(),
            filters: filters.clone(),
        })
    }
}

#[async_trait]
impl CandidateSource for JupiterDiscovery {
    async fn fetch_candidates(&self) -> Result<Vec<Candidate>> {
        let url = format!(
            "{}/pools/toporganicscore/{}",
            self.endpoints.discovery_api.trim_end_matches('/'),
            self.filters.timeframe
        );
        let response: TopPoolsResponse = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(LpError::from)?
            .json()
            .await
            .map_err(LpError::from)?;

        let total = response.pools.len();
        let candidates = filter_top_pools(response.pools, &self.filters, now_ms());
        info!("✅ 排名服务返回 {} 个池子，过滤后 {} 个候选", total, candidates.len());
        Ok(candidates)
    }

    async fn resolve_pool(&self, candidate: &Candidate) -> Result<Option<String>> {
        if let Some(pool) = &candidate.pool_address {
            return Ok(Some(pool.clone()));
        }
        let url = format!(
            "{}/pair/all_by_groups",
            self.endpoints.meteora_api.trim_end_matches('/')
        );
        let response: PairGroupsResponse = self
            .http
            .get(&url)
            .query(&[("search_term", candidate.mint.as_str()), ("limit", "100")])
            .send()
            .await
            .map_err(LpError::from)?
            .json()
            .await
            .map_err(LpError::from)?;

        let pairs: Vec<MeteoraPair> = response.groups.into_iter().flat_map(|g| g.pairs).collect();
        let pool = best_pair(&pairs, &self.filters.bin_steps);
        debug!("{} 的候选池子: {:?}", candidate.symbol, pool);
        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;

    fn top_pool(mint: &str, score: f64, label: &str, age_hours: i64, volume: f64) -> TopPool {
        let created = Utc.timestamp_millis_opt(NOW - age_hours * 3_600_000).unwrap().to_rfc3339();
        serde_json::from_value(json!({
            "id": format!("{}-pool", mint),
            "createdAt": created,
            "quoteAsset": SOL_MINT,
            "volume24h": volume,
            "baseAsset": {
                "id": mint,
                "symbol": mint.to_uppercase(),
                "mcap": 5_000_000.0,
                "organicScore": score,
                "organicScoreLabel": label
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_filters_and_sorts_candidates() {
        let pools = vec![
            top_pool("a", 80.0, "medium", 2, 2_000_000.0),
            top_pool("b", 95.0, "high", 3, 2_000_000.0),
            top_pool("low_score", 60.0, "high", 3, 2_000_000.0),
            top_pool("too_old", 99.0, "high", 48, 2_000_000.0),
            top_pool("thin", 99.0, "high", 3, 10.0),
            top_pool("bad_label", 99.0, "low", 3, 2_000_000.0),
        ];
        let candidates = filter_top_pools(pools, &DiscoveryFilters::default(), NOW);
        let mints: Vec<&str> = candidates.iter().map(|c| c.mint.as_str()).collect();
        assert_eq!(mints, vec!["b", "a"]);
    }

    #[test]
    fn test_best_pair_prefers_volume_within_bin_steps() {
        let pairs: Vec<MeteoraPair> = serde_json::from_value(json!([
            {"address": "p80", "mint_y": SOL_MINT, "bin_step": 80, "trade_volume_24h": 1000.0},
            {"address": "p100", "mint_y": SOL_MINT, "bin_step": 100, "trade_volume_24h": 5000.0},
            {"address": "p20", "mint_y": SOL_MINT, "bin_step": 20, "trade_volume_24h": 90000.0},
            {"address": "usdc", "mint_y": "USDC", "bin_step": 100, "trade_volume_24h": 90000.0}
        ]))
        .unwrap();
        assert_eq!(best_pair(&pairs, &[80, 100, 125, 250]), Some("p100".to_string()));
        assert_eq!(best_pair(&pairs, &[250]), None);
    }
}
