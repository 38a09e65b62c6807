pub mod account;
pub mod stats;

pub use account::GrazieAccount;
pub use stats::{PeriodStats, RequestRecord, RequestStats, TokenInfo};
