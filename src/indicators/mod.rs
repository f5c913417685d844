pub mod ema;
pub mod rsi;
pub mod macd;
pub mod atr;

pub use ema::*;
pub use rsi::*;
pub use macd::*;
pub use atr::*;

pub trait Indicator {
    fn name(&self) -> &'static str;
    fn is_ready(&self) -> bool;
    fn reset(&mut self);
}
