pub mod benders;
pub mod error;
pub mod lp;
pub mod problems;

pub use error::{Error, Result};
