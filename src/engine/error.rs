//! Stable error kinds surfaced by the matching engine's public contract
//! (`spec.md` §7). Manual `Display` + `std::error::Error` rather than a
//! `thiserror` derive — this is the crate's one stable-over-time contract
//! surface.

use std::fmt;

/// Every variant the core can report back to a caller. `#[non_exhaustive]`
/// because new validation failures may be added in a minor version
/// without it being a breaking match-exhaustiveness change downstream.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    OrderNotFound,
    OrderNotActive,
    OrderAlreadyFilled,
    OrderAlreadyCancelled,
    InvalidPrice,
    InvalidQuantity,
    InvalidSide,
    InvalidOrderType,
    InvalidMarketId,
    InvalidTrader,
    InvalidTriggerPrice,
    Unauthorized,
    InsufficientMargin,
    IocNoFill,
    FokNotFilled,
    PostOnlyWouldTake,
    ReduceOnlyWouldIncrease,
    OrderWouldExceedMaxPosition,
    ConditionalOrderNotFound,
    ConditionalOrderAlreadyTriggered,
    ConditionalOrderAlreadyCancelled,
    /// Hard cap of 100 orders per `process_batch` call.
    BatchTooLarge,
    InvalidOrder,
    /// Wraps a failure surfaced by the KV/persistence layer.
    Persistence(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::OrderNotFound => write!(f, "order not found"),
            EngineError::OrderNotActive => write!(f, "order is not active"),
            EngineError::OrderAlreadyFilled => write!(f, "order is already filled"),
            EngineError::OrderAlreadyCancelled => write!(f, "order is already cancelled"),
            EngineError::InvalidPrice => write!(f, "invalid price"),
            EngineError::InvalidQuantity => write!(f, "invalid quantity"),
            EngineError::InvalidSide => write!(f, "invalid side"),
            EngineError::InvalidOrderType => write!(f, "invalid order type"),
            EngineError::InvalidMarketId => write!(f, "invalid market id"),
            EngineError::InvalidTrader => write!(f, "invalid trader"),
            EngineError::InvalidTriggerPrice => write!(f, "invalid trigger price"),
            EngineError::Unauthorized => write!(f, "caller is not the order's trader"),
            EngineError::InsufficientMargin => write!(f, "insufficient margin"),
            EngineError::IocNoFill => write!(f, "IOC order produced no fill"),
            EngineError::FokNotFilled => write!(f, "FOK order could not be filled in full"),
            EngineError::PostOnlyWouldTake => write!(f, "post-only order would have taken liquidity"),
            EngineError::ReduceOnlyWouldIncrease => {
                write!(f, "reduce-only order would increase position size")
            }
            EngineError::OrderWouldExceedMaxPosition => {
                write!(f, "order would exceed the market's max position")
            }
            EngineError::ConditionalOrderNotFound => write!(f, "conditional order not found"),
            EngineError::ConditionalOrderAlreadyTriggered => {
                write!(f, "conditional order already triggered")
            }
            EngineError::ConditionalOrderAlreadyCancelled => {
                write!(f, "conditional order already cancelled")
            }
            EngineError::BatchTooLarge => write!(f, "batch exceeds the 100-order cap"),
            EngineError::InvalidOrder => write!(f, "malformed batch element"),
            EngineError::Persistence(msg) => write!(f, "persistence error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<crate::kv::KvError> for EngineError {
    fn from(err: crate::kv::KvError) -> Self {
        EngineError::Persistence(err.0)
    }
}
