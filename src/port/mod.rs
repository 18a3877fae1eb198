//! Trait seams for every external collaborator.
//!
//! The core never talks to a venue, a data feed, a decision backend or a
//! storage engine directly, only through these ports. Implementations
//! must be `Send + Sync`; every call carries an explicit deadline enforced
//! by the caller.

pub mod decision;
pub mod gateway;
pub mod journal;
pub mod market_data;

pub use decision::DecisionSource;
pub use gateway::{
    retry_transient, ExchangePosition, ExecutionGateway, GatewayPolicy, OrderRequest, OrderResult,
    OrderType,
};
pub use journal::{journal_event, Journal, JournalEvent};
pub use market_data::MarketDataProvider;
