use crate::liquidity::PositionValue;
use crate::types::{short, BinRange};
use log::info;

// 相对开仓价值的涨跌百分比
pub fn pnl_percent(start_usd: f64, current_usd: f64) -> f64 {
    if start_usd <= 0.0 {
        return 0.0;
    }
    (current_usd - start_usd) / start_usd * 100.0
}

/// 以区间中心作为开仓价格估算的无常损失百分比（负数）。
///
/// 价格比 r = (1 + binStep/10000)^(active - center)，IL = 2√r/(1+r) - 1。
pub fn impermanent_loss_pct(bin_step: u16, active_id: i32, range: BinRange) -> f64 {
    let center = (range.lower_bin_id + range.upper_bin_id) as f64 / 2.0;
    let step = 1.0 + bin_step as f64 / 10_000.0;
    let ratio = step.powf(active_id as f64 - center);
    if !ratio.is_finite() || ratio <= 0.0 {
        return 0.0;
    }
    (2.0 * ratio.sqrt() / (1.0 + ratio) - 1.0) * 100.0
}

pub struct MetricsCollector;

impl MetricsCollector {
    pub fn log_snapshot(
        position: &str,
        value: &PositionValue,
        start_usd: f64,
        percent: f64,
        il_pct: f64,
        in_range: bool,
    ) {
        info!(
            "📊 {} 价值 ${:.4} (开仓 ${:.4}) 盈亏 {:+.2}% 手续费 ${:.4} 无常损失 {:.2}% {}",
            short(position),
            value.total_usd,
            start_usd,
            percent,
            value.fee_usd,
            il_pct,
            if in_range { "区间内" } else { "⚠️ 区间外" }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pnl_percent() {
        assert!((pnl_percent(100.0, 112.0) - 12.0).abs() < 1e-9);
        assert!((pnl_percent(100.0, 95.0) + 5.0).abs() < 1e-9);
        assert_eq!(pnl_percent(0.0, 50.0), 0.0);
        assert_eq!(pnl_percent(-1.0, 50.0), 0.0);
    }

    #[test]
    fn test_impermanent_loss_zero_at_center() {
        let range = BinRange::new(-34, 34);
        assert!(impermanent_loss_pct(100, 0, range).abs() < 1e-12);
        let il = impermanent_loss_pct(100, 34, range);
        assert!(il < 0.0);
        assert!((impermanent_loss_pct(100, -34, range) - il).abs() < 1e-9);
    }
}
