//! Persistence keeper (C4): prefix-scoped CRUD over the external KV plus
//! monotonic ID minting (`spec.md` §4.3).
//!
//! A thin typed layer over raw bytes, with `serde_json` for the stable,
//! lossless encoding `spec.md` §6.4 requires ("implementation-defined
//! but... lossless and stable within a major version").

use crate::book::BookSnapshot;
use crate::kv::{KvError, KvStore};
use crate::order::{
    ConditionalOrder, MarketId, OcoId, OcoOrder, Order, OrderId, ScaleOrder, Trade, TradeId,
    TrailId, TrailingStopOrder, TraderId, TwapOrder,
};
use std::sync::Arc;

const PREFIX_ORDER: u8 = 0x01;
const PREFIX_BOOK: u8 = 0x02;
const PREFIX_TRADE: u8 = 0x03;
const PREFIX_TRADE_COUNTER: u8 = 0x04;
const PREFIX_ORDER_COUNTER: u8 = 0x05;
const PREFIX_CONDITIONAL: u8 = 0x06;
const PREFIX_TRAILING: u8 = 0x20;
const PREFIX_TRAILING_BY_MARKET: u8 = 0x21;
const PREFIX_OCO: u8 = 0x30;
const PREFIX_OCO_BY_MARKET: u8 = 0x31;
const PREFIX_OCO_BY_COMPONENT: u8 = 0x32;
/// Not in `spec.md` §4.3's literal table but required to mint `OcoId`s and
/// `TrailId`s the same way `order_id`/`trade_id` are minted under 0x04/0x05
/// — monotonic counters for every id kind the keeper mints.
const PREFIX_OCO_COUNTER: u8 = 0x33;
const PREFIX_TRAIL_COUNTER: u8 = 0x34;
/// Also not in `spec.md` §4.3's literal table: scale/TWAP parent orders
/// (`spec.md` §3 `ScaleOrder`/`TWAPOrder`) need their own durable slot
/// since they are not `Order`s themselves (they own child `Order`s, which
/// persist normally under `PREFIX_ORDER`).
const PREFIX_SCALE: u8 = 0x35;
const PREFIX_TWAP: u8 = 0x36;

fn key(prefix: u8, suffix: &[u8]) -> Vec<u8> {
    let mut k = Vec::with_capacity(1 + suffix.len());
    k.push(prefix);
    k.extend_from_slice(suffix);
    k
}

fn market_key(prefix: u8, market_id: &str, suffix: &str) -> Vec<u8> {
    let mut k = vec![prefix];
    k.extend_from_slice(market_id.as_bytes());
    k.push(b':');
    k.extend_from_slice(suffix.as_bytes());
    k
}

/// A thin, typed layer over a [`KvStore`] implementing the prefix table of
/// `spec.md` §4.3. Stateless beyond the store handle — every call is a
/// direct KV round trip, by design: the write-through cache (C5) is where
/// batching/dirty-tracking lives.
pub struct Keeper {
    store: Arc<dyn KvStore>,
}

impl Keeper {
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    fn next_id(&self, counter_prefix: u8) -> Result<u64, KvError> {
        let key = vec![counter_prefix];
        let current = match self.store.get(&key)? {
            Some(bytes) => u64::from_be_bytes(bytes.as_slice().try_into().map_err(|_| {
                KvError(format!("corrupt counter at prefix {counter_prefix:#x}"))
            })?),
            None => 0,
        };
        let next = current + 1;
        self.store.set(&key, next.to_be_bytes().to_vec())?;
        Ok(next)
    }

    pub fn mint_order_id(&self) -> Result<OrderId, KvError> {
        Ok(OrderId(self.next_id(PREFIX_ORDER_COUNTER)?))
    }

    pub fn mint_trade_id(&self) -> Result<TradeId, KvError> {
        Ok(TradeId(self.next_id(PREFIX_TRADE_COUNTER)?))
    }

    pub fn mint_oco_id(&self) -> Result<OcoId, KvError> {
        Ok(OcoId(self.next_id(PREFIX_OCO_COUNTER)?))
    }

    pub fn mint_trail_id(&self) -> Result<TrailId, KvError> {
        Ok(TrailId(self.next_id(PREFIX_TRAIL_COUNTER)?))
    }

    // -- Orders (0x01) --------------------------------------------------

    pub fn put_order(&self, order: &Order) -> Result<(), KvError> {
        let bytes = serde_json::to_vec(order).map_err(|e| KvError(e.to_string()))?;
        self.store
            .set(&key(PREFIX_ORDER, order.order_id.0.to_string().as_bytes()), bytes)
    }

    pub fn get_order(&self, id: OrderId) -> Result<Option<Order>, KvError> {
        let Some(bytes) = self.store.get(&key(PREFIX_ORDER, id.0.to_string().as_bytes()))? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes).map_err(|e| KvError(e.to_string()))?))
    }

    pub fn delete_order(&self, id: OrderId) -> Result<(), KvError> {
        self.store.delete(&key(PREFIX_ORDER, id.0.to_string().as_bytes()))
    }

    /// All orders belonging to `trader`, across markets (`spec.md` §4.3
    /// `orders_by_trader`).
    pub fn orders_by_trader(&self, trader: &TraderId) -> Result<Vec<Order>, KvError> {
        Ok(self
            .all_orders()?
            .into_iter()
            .filter(|o| &o.trader == trader)
            .collect())
    }

    pub fn all_pending_orders(&self) -> Result<Vec<Order>, KvError> {
        Ok(self.all_orders()?.into_iter().filter(|o| o.is_active()).collect())
    }

    pub fn pending_orders_by_market(&self, market_id: &str) -> Result<Vec<Order>, KvError> {
        Ok(self
            .all_orders()?
            .into_iter()
            .filter(|o| o.is_active() && o.market_id == market_id)
            .collect())
    }

    fn all_orders(&self) -> Result<Vec<Order>, KvError> {
        self.store
            .prefix_iter(&[PREFIX_ORDER])?
            .into_iter()
            .map(|(_, v)| serde_json::from_slice(&v).map_err(|e| KvError(e.to_string())))
            .collect()
    }

    // -- Book snapshots (0x02) ------------------------------------------

    pub fn put_book_snapshot(&self, snapshot: &BookSnapshot) -> Result<(), KvError> {
        let bytes = serde_json::to_vec(snapshot).map_err(|e| KvError(e.to_string()))?;
        self.store
            .set(&key(PREFIX_BOOK, snapshot.market_id.as_bytes()), bytes)
    }

    pub fn get_book_snapshot(&self, market_id: &str) -> Result<Option<BookSnapshot>, KvError> {
        let Some(bytes) = self.store.get(&key(PREFIX_BOOK, market_id.as_bytes()))? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes).map_err(|e| KvError(e.to_string()))?))
    }

    // -- Trades (0x03) ---------------------------------------------------

    pub fn put_trade(&self, trade: &Trade) -> Result<(), KvError> {
        let bytes = serde_json::to_vec(trade).map_err(|e| KvError(e.to_string()))?;
        self.store
            .set(&key(PREFIX_TRADE, trade.trade_id.0.to_string().as_bytes()), bytes)
    }

    /// Most recent trades for `market_id`, newest first, capped at `limit`
    /// (`spec.md` §4.3 "reverse scan").
    pub fn recent_trades_by_market(&self, market_id: &str, limit: usize) -> Result<Vec<Trade>, KvError> {
        let mut trades: Vec<Trade> = self
            .store
            .reverse_prefix_iter(&[PREFIX_TRADE])?
            .into_iter()
            .map(|(_, v)| serde_json::from_slice::<Trade>(&v).map_err(|e| KvError(e.to_string())))
            .collect::<Result<_, _>>()?;
        trades.retain(|t| t.market_id == market_id);
        trades.truncate(limit);
        Ok(trades)
    }

    /// Filtered trade history across all markets matching `predicate`
    /// (`spec.md` §4.3 "filtered trade history").
    pub fn trade_history(&self, predicate: impl Fn(&Trade) -> bool) -> Result<Vec<Trade>, KvError> {
        Ok(self
            .store
            .prefix_iter(&[PREFIX_TRADE])?
            .into_iter()
            .map(|(_, v)| serde_json::from_slice::<Trade>(&v).map_err(|e| KvError(e.to_string())))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(predicate)
            .collect())
    }

    // -- Conditional orders (0x06) ---------------------------------------

    pub fn put_conditional(&self, order: &ConditionalOrder) -> Result<(), KvError> {
        let bytes = serde_json::to_vec(order).map_err(|e| KvError(e.to_string()))?;
        self.store
            .set(&key(PREFIX_CONDITIONAL, order.order_id.0.to_string().as_bytes()), bytes)
    }

    pub fn get_conditional(&self, id: OrderId) -> Result<Option<ConditionalOrder>, KvError> {
        let Some(bytes) = self.store.get(&key(PREFIX_CONDITIONAL, id.0.to_string().as_bytes()))? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes).map_err(|e| KvError(e.to_string()))?))
    }

    pub fn all_conditionals(&self) -> Result<Vec<ConditionalOrder>, KvError> {
        self.store
            .prefix_iter(&[PREFIX_CONDITIONAL])?
            .into_iter()
            .map(|(_, v)| serde_json::from_slice(&v).map_err(|e| KvError(e.to_string())))
            .collect()
    }

    // -- Trailing stops (0x20 / 0x21) -------------------------------------

    pub fn put_trailing_stop(&self, order: &TrailingStopOrder) -> Result<(), KvError> {
        let bytes = serde_json::to_vec(order).map_err(|e| KvError(e.to_string()))?;
        self.store
            .set(&key(PREFIX_TRAILING, order.order_id.0.to_string().as_bytes()), bytes)?;
        self.store.set(
            &market_key(PREFIX_TRAILING_BY_MARKET, &order.market_id, &order.order_id.0.to_string()),
            order.order_id.0.to_string().into_bytes(),
        )
    }

    pub fn get_trailing_stop(&self, id: TrailId) -> Result<Option<TrailingStopOrder>, KvError> {
        let Some(bytes) = self.store.get(&key(PREFIX_TRAILING, id.0.to_string().as_bytes()))? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes).map_err(|e| KvError(e.to_string()))?))
    }

    pub fn trailing_stops_by_market(&self, market_id: &str) -> Result<Vec<TrailingStopOrder>, KvError> {
        let prefix = market_key(PREFIX_TRAILING_BY_MARKET, market_id, "");
        let ids: Vec<u64> = self
            .store
            .prefix_iter(&prefix)?
            .into_iter()
            .filter_map(|(_, v)| String::from_utf8(v).ok()?.parse().ok())
            .collect();
        ids.into_iter()
            .filter_map(|id| self.get_trailing_stop(TrailId(id)).transpose())
            .collect()
    }

    // -- OCO pairs (0x30 / 0x31 / 0x32) ------------------------------------

    pub fn put_oco(&self, oco: &OcoOrder, market_id: &str) -> Result<(), KvError> {
        let bytes = serde_json::to_vec(oco).map_err(|e| KvError(e.to_string()))?;
        self.store
            .set(&key(PREFIX_OCO, oco.oco_id.0.to_string().as_bytes()), bytes)?;
        self.store.set(
            &market_key(PREFIX_OCO_BY_MARKET, market_id, &oco.oco_id.0.to_string()),
            oco.oco_id.0.to_string().into_bytes(),
        )?;
        self.store.set(
            &key(PREFIX_OCO_BY_COMPONENT, oco.stop_order.order_id.0.to_string().as_bytes()),
            oco.oco_id.0.to_string().into_bytes(),
        )?;
        self.store.set(
            &key(PREFIX_OCO_BY_COMPONENT, oco.limit_order.order_id.0.to_string().as_bytes()),
            oco.oco_id.0.to_string().into_bytes(),
        )
    }

    pub fn get_oco(&self, id: OcoId) -> Result<Option<OcoOrder>, KvError> {
        let Some(bytes) = self.store.get(&key(PREFIX_OCO, id.0.to_string().as_bytes()))? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes).map_err(|e| KvError(e.to_string()))?))
    }

    /// Resolves the OCO pair owning `component_order_id`, if any — the
    /// index the matching engine consults on every fill to notify the OCO
    /// manager (§9 open-question resolution 2).
    pub fn oco_by_component_order(&self, component_order_id: OrderId) -> Result<Option<OcoId>, KvError> {
        let Some(bytes) = self
            .store
            .get(&key(PREFIX_OCO_BY_COMPONENT, component_order_id.0.to_string().as_bytes()))?
        else {
            return Ok(None);
        };
        let text = String::from_utf8(bytes).map_err(|e| KvError(e.to_string()))?;
        let id: u64 = text.parse().map_err(|e: std::num::ParseIntError| KvError(e.to_string()))?;
        Ok(Some(OcoId(id)))
    }

    pub fn ocos_by_market(&self, market_id: &str) -> Result<Vec<OcoOrder>, KvError> {
        let prefix = market_key(PREFIX_OCO_BY_MARKET, market_id, "");
        let ids: Vec<u64> = self
            .store
            .prefix_iter(&prefix)?
            .into_iter()
            .filter_map(|(_, v)| String::from_utf8(v).ok()?.parse().ok())
            .collect();
        ids.into_iter()
            .filter_map(|id| self.get_oco(OcoId(id)).transpose())
            .collect()
    }

    // -- Scale orders (0x35) ---------------------------------------------

    pub fn put_scale(&self, order: &ScaleOrder) -> Result<(), KvError> {
        let bytes = serde_json::to_vec(order).map_err(|e| KvError(e.to_string()))?;
        self.store.set(&key(PREFIX_SCALE, order.scale_id.0.to_string().as_bytes()), bytes)
    }

    pub fn get_scale(&self, id: OrderId) -> Result<Option<ScaleOrder>, KvError> {
        let Some(bytes) = self.store.get(&key(PREFIX_SCALE, id.0.to_string().as_bytes()))? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes).map_err(|e| KvError(e.to_string()))?))
    }

    pub fn all_scales(&self) -> Result<Vec<ScaleOrder>, KvError> {
        self.store
            .prefix_iter(&[PREFIX_SCALE])?
            .into_iter()
            .map(|(_, v)| serde_json::from_slice(&v).map_err(|e| KvError(e.to_string())))
            .collect()
    }

    // -- TWAP orders (0x36) ------------------------------------------------

    pub fn put_twap(&self, order: &TwapOrder) -> Result<(), KvError> {
        let bytes = serde_json::to_vec(order).map_err(|e| KvError(e.to_string()))?;
        self.store.set(&key(PREFIX_TWAP, order.twap_id.0.to_string().as_bytes()), bytes)
    }

    pub fn get_twap(&self, id: OrderId) -> Result<Option<TwapOrder>, KvError> {
        let Some(bytes) = self.store.get(&key(PREFIX_TWAP, id.0.to_string().as_bytes()))? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes).map_err(|e| KvError(e.to_string()))?))
    }

    pub fn all_twaps(&self) -> Result<Vec<TwapOrder>, KvError> {
        self.store
            .prefix_iter(&[PREFIX_TWAP])?
            .into_iter()
            .map(|(_, v)| serde_json::from_slice(&v).map_err(|e| KvError(e.to_string())))
            .collect()
    }
}
