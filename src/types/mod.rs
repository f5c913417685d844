pub mod ai_decision;
pub mod alert;
pub mod candle;
pub mod cycle;
pub mod indicators;
pub mod order;
pub mod performance;
pub mod portfolio;
pub mod position;
pub mod symbol;
pub mod trading;

pub use ai_decision::*;
pub use alert::*;
pub use candle::*;
pub use cycle::*;
pub use indicators::*;
pub use order::*;
pub use performance::*;
pub use portfolio::*;
pub use position::*;
pub use symbol::*;
pub use trading::*;

use rust_decimal::Decimal;

pub fn sma(values: &[Decimal], period: usize) -> Option<Decimal> {
    if values.len() < period || period == 0 {
        return None;
    }
    let sum: Decimal = values.iter().rev().take(period).sum();
    Some(sum / Decimal::from(period as u32))
}
