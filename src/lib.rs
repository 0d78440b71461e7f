pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod gateway;

pub use config::Config;
pub use domain::{
    AssetId, AssetPrice, Decimal, Direction, DisposalMethod, TimeMs, Trade, Transaction,
    TransactionId, TransactionKind, TransactionRecord,
};
pub use engine::{
    build_history, build_history_as_of, compute_portfolio_pnl, compute_realized_pnl,
    DisposalEngine, HistoricalDataPoint, HistoryFold, HistoryReconstructor, Lot, PnLResult,
    Position, ShortfallPolicy, DUST_THRESHOLD,
};
pub use error::EngineError;
pub use gateway::{
    CachedPriceGateway, CoinGeckoConfig, CoinGeckoGateway, GatewayError, MockPriceGateway,
    PriceCache, PriceGateway,
};
