pub mod alpaca;
pub mod broker;
pub mod halt_feed;
pub mod paper;
pub mod polygon;
pub mod quote;
pub mod shape;
pub mod webull;

pub use alpaca::AlpacaQuoteClient;
pub use broker::{
    round_cents, BracketOrder, BrokerError, BrokerGateway, BrokerOrder, BrokerPosition, BrokerResult,
    OrderStatus, OrderType,
};
pub use halt_feed::{HaltFeed, NasdaqHaltFeed};
pub use paper::PaperBroker;
pub use polygon::PolygonClient;
pub use quote::{QuoteProvider, QuoteSource};
pub use webull::{WebullClient, WebullConfig};
