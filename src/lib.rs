pub mod config;
mod error;
pub mod harvest;
pub mod ledger;
pub mod run;
pub mod scroll;
pub mod webdriver;

pub use error::{Result, VaultError};
