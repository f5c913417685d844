pub mod adapter;
pub mod deepseek;

pub use adapter::*;
pub use deepseek::*;
