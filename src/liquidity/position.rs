use crate::liquidity::pool::{OwnerPosition, PoolInfo};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// 仓位的美元估值
#[derive(Default, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct PositionValue {
    pub amount_x: f64,
    pub amount_y: f64,
    pub fee_x: f64,
    pub fee_y: f64,
    pub liquidity_usd: f64,
    pub fee_usd: f64,
    pub total_usd: f64,  // 流动性 + 未领取手续费
}

// 原始数量按小数位换算
fn to_ui_amount(amount: u64, decimals: u8) -> Decimal {
    let mut value = Decimal::from(amount);
    // Decimal最多28位小数
    value.set_scale(decimals.min(28) as u32).ok();
    value.normalize()
}

fn price_decimal(price: f64) -> Decimal {
    Decimal::from_f64(price).unwrap_or_default()
}

// (amountX+feeX)·priceX + (amountY+feeY)·priceY
pub fn value_position(position: &OwnerPosition, info: &PoolInfo, price_x: f64, price_y: f64) -> PositionValue {
    let px = price_decimal(price_x);
    let py = price_decimal(price_y);

    let amount_x = to_ui_amount(position.amount_x, info.decimals_x);
    let amount_y = to_ui_amount(position.amount_y, info.decimals_y);
    let fee_x = to_ui_amount(position.fee_x, info.decimals_x);
    let fee_y = to_ui_amount(position.fee_y, info.decimals_y);

    let liquidity_usd = amount_x * px + amount_y * py;
    let fee_usd = fee_x * px + fee_y * py;

    PositionValue {
        amount_x: amount_x.to_f64().unwrap_or(0.0),
        amount_y: amount_y.to_f64().unwrap_or(0.0),
        fee_x: fee_x.to_f64().unwrap_or(0.0),
        fee_y: fee_y.to_f64().unwrap_or(0.0),
        liquidity_usd: liquidity_usd.to_f64().unwrap_or(0.0),
        fee_usd: fee_usd.to_f64().unwrap_or(0.0),
        total_usd: (liquidity_usd + fee_usd).to_f64().unwrap_or(0.0),
    }
}
