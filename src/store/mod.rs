pub mod documents;
pub mod json_store;

pub use documents::*;
pub use json_store::*;
