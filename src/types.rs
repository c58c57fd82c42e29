use serde::{Deserialize, Serialize};

pub const SOL_MINT: &str = "So11111111111111111111111111111111111111112";
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;
pub const FULL_BPS: u16 = 10_000;

// 流动性投入方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidityMode {
    Balanced,  // 50:50，以活跃bin为中心
    OneSided,  // 单边，只在活跃bin一侧
}

// 固定数量的一侧，另一侧由策略计算
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnchorSide {
    X,
    Y,
}

// 分布策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    Spot,    // 平均分布
    BidAsk,  // 两端偏重
    Curve,   // 中间偏重
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinRange {
    pub lower_bin_id: i32,
    pub upper_bin_id: i32,
}

impl BinRange {
    pub fn new(lower_bin_id: i32, upper_bin_id: i32) -> Self {
        Self { lower_bin_id, upper_bin_id }
    }

    pub fn contains(&self, bin_id: i32) -> bool {
        bin_id >= self.lower_bin_id && bin_id <= self.upper_bin_id
    }

    pub fn width(&self) -> usize {
        (self.upper_bin_id - self.lower_bin_id + 1).max(0) as usize
    }
}

// 排名服务产出的候选代币，只在本轮扫描中使用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub mint: String,
    pub symbol: String,
    pub score: f64,
    pub pool_address: Option<String>,
}

// 地址缩写，用于日志
pub fn short(key: &str) -> &str {
    let end = key.char_indices().nth(6).map(|(i, _)| i).unwrap_or(key.len());
    &key[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bin_range_contains_edges() {
        let range = BinRange::new(-10, 10);
        assert!(range.contains(-10));
        assert!(range.contains(10));
        assert!(!range.contains(11));
        assert_eq!(range.width(), 21);
    }

    #[test]
    fn test_short_key() {
        assert_eq!(short("So11111111111111111111111111111111111111112"), "So1111");
        assert_eq!(short("abc"), "abc");
    }
}
