use crate::types::{AnchorSide, BinRange, LiquidityMode};
use std::collections::HashSet;

// 每个bin数组包含70个bin
pub const MAX_BIN_PER_ARRAY: i32 = 70;

// 根据投入方式计算仓位区间
pub fn range_for_mode(active_id: i32, half_width: i32, mode: LiquidityMode, anchor: AnchorSide) -> BinRange {
    match (mode, anchor) {
        (LiquidityMode::Balanced, _) => BinRange::new(active_id - half_width, active_id + half_width),
        // 单边X放在活跃bin上方，价格上涨时卖出
        (LiquidityMode::OneSided, AnchorSide::X) => BinRange::new(active_id, active_id + 2 * half_width),
        (LiquidityMode::OneSided, AnchorSide::Y) => BinRange::new(active_id - 2 * half_width, active_id),
    }
}

// 区间内没有初始化的bin
pub fn missing_bins(range: BinRange, initialized: &[i32]) -> Vec<i32> {
    let present: HashSet<i32> = initialized.iter().copied().collect();
    (range.lower_bin_id..=range.upper_bin_id)
        .filter(|id| !present.contains(id))
        .collect()
}

// bin所在的bin数组索引（向下取整）
pub fn bin_id_to_bin_array_index(bin_id: i32) -> i64 {
    (bin_id as i64).div_euclid(MAX_BIN_PER_ARRAY as i64)
}

// 区间覆盖的bin数组索引
pub fn bin_array_indexes(range: BinRange) -> Vec<i64> {
    let lower = bin_id_to_bin_array_index(range.lower_bin_id);
    let upper = bin_id_to_bin_array_index(range.upper_bin_id);
    (lower..=upper).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balanced_range_is_centered() {
        let range = range_for_mode(100, 34, LiquidityMode::Balanced, AnchorSide::X);
        assert_eq!(range, BinRange::new(66, 134));
        assert_eq!(range.width(), 69);
    }

    #[test]
    fn test_one_sided_ranges() {
        assert_eq!(
            range_for_mode(100, 34, LiquidityMode::OneSided, AnchorSide::X),
            BinRange::new(100, 168)
        );
        assert_eq!(
            range_for_mode(100, 34, LiquidityMode::OneSided, AnchorSide::Y),
            BinRange::new(32, 100)
        );
    }

    #[test]
    fn test_missing_bins() {
        let range = BinRange::new(-2, 2);
        assert!(missing_bins(range, &[-2, -1, 0, 1, 2, 3]).is_empty());
        assert_eq!(missing_bins(range, &[-2, 0, 2]), vec![-1, 1]);
    }

    #[test]
    fn test_bin_array_index_floors_negative_ids() {
        assert_eq!(bin_id_to_bin_array_index(0), 0);
        assert_eq!(bin_id_to_bin_array_index(69), 0);
        assert_eq!(bin_id_to_bin_array_index(70), 1);
        assert_eq!(bin_id_to_bin_array_index(-1), -1);
        assert_eq!(bin_array_indexes(BinRange::new(-34, 34)), vec![-1, 0]);
    }
}
