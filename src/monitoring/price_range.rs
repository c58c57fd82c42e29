use crate::state::PositionRecord;
use crate::types::BinRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    OutOfRange,  // 超出区间过久，按止损处理
    Forced,
}

impl ExitReason {
    pub fn is_loss(&self) -> bool {
        matches!(self, ExitReason::StopLoss | ExitReason::OutOfRange)
    }
}

pub struct PriceRangeMonitor;

impl PriceRangeMonitor {
    // 检查价格是否在区间内
    pub fn is_price_in_range(active_id: i32, range: BinRange) -> bool {
        range.contains(active_id)
    }

    // 更新出区间计时，本次超时触发时返回true；每次出区间只触发一次
    pub fn update_out_of_range(record: &mut PositionRecord, in_range: bool, now: i64, timeout_ms: i64) -> bool {
        if in_range {
            record.out_since = None;
            record.out_of_range_triggered = false;
            return false;
        }
        let since = *record.out_since.get_or_insert(now);
        if !record.out_of_range_triggered && now - since >= timeout_ms {
            record.out_of_range_triggered = true;
            return true;
        }
        false
    }

    pub fn decide_exit(
        percent: f64,
        take_profit_pct: f64,
        stop_loss_pct: f64,
        out_of_range_fired: bool,
        forced: bool,
    ) -> Option<ExitReason> {
        if forced {
            Some(ExitReason::Forced)
        } else if percent >= take_profit_pct {
            Some(ExitReason::TakeProfit)
        } else if percent <= stop_loss_pct {
            Some(ExitReason::StopLoss)
        } else if out_of_range_fired {
            Some(ExitReason::OutOfRange)
        } else {
            None
        }
    }
}
