// Familiar Market - Core Library
// Exposes all modules for use in the CLI, API server, and tests

pub mod contracts;
pub mod db;
pub mod entities;
pub mod error;
pub mod matching;
pub mod review;
pub mod roster;
pub mod seed;

// Re-export commonly used types
pub use contracts::{Contract, ContractDetails, ContractStatus};
pub use db::{open_database, setup_database};
pub use entities::{
    Customer, CustomerPatch, Familiar, FamiliarPatch, Group, GroupPatch, NewCustomer, NewFamiliar,
    NewGroup, NewWizard, Wizard, WizardPatch,
};
pub use error::{EntityKind, MarketError};
pub use matching::{
    form_contract, AcceptanceOracle, CoinFlip, MatchOutcome, OracleFn, DEFAULT_ACCEPT_CHANCE,
};
pub use review::{review, ReviewDecision};
pub use seed::{seed_demo, SeedSummary};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default database file when no environment override is set.
pub const DEFAULT_DB_PATH: &str = "familiar-market.db";

/// Database path from `FAMILIAR_MARKET_DB`, falling back to the default.
pub fn db_path_from_env() -> String {
    std::env::var("FAMILIAR_MARKET_DB").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string())
}
