// rank-split - Core Library
// Rank-weighted expense settlement for parties; used by the CLI/TUI, the API server and tests

pub mod error;
pub mod numeric;
pub mod rates;
pub mod settlement;
pub mod db;
pub mod config;

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use error::{SettleError, SettleResult};
pub use numeric::{round_half_up, Amount, Rank};
pub use rates::{RankRates, RateAllocator, RateEdit};
pub use settlement::{
    ExpenseEntry, ParticipantEntry, RatePolicy, SettlementCalculator, SettlementReport,
    SettlementRow,
};
pub use db::{
    Member, Party, Expense, PartyDetail, NewMember, NewParty, NewExpense, Event, NotFound,
    open_database, setup_database, load_party_detail, settle_party,
    insert_event, get_events_for_entity,
};
pub use config::Settings;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
