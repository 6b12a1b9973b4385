//! Outbound event emission (`spec.md` §6.3, §9 "emit through a capability
//! passed in the context, not a process-global sink; tests mock it").
//!
//! Every event is a stable type string plus an attribute map, emitted
//! through a capability trait so the default build has a
//! zero-dependency in-memory sink and the optional `nats` feature swaps
//! in a real publisher without the engine caring which one it's holding.

use crate::decimal::{Price, Quantity};
use crate::order::{MarketId, OrderId, Side, TraderId};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// The stable event-type strings of `spec.md` §6.3's minimum set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventKind {
    PlaceOrder,
    CancelOrder,
    Trade,
    ConditionalOrderPlaced,
    ConditionalOrderTriggered,
    ConditionalOrderCancelled,
    TrailingStopPlaced,
    TrailingStopTriggered,
    TrailingStopCancelled,
    OcoPlaced,
    OcoTriggered,
    OcoCancelled,
    ScaleOrderCreated,
    ScaleOrderCancelled,
    TwapOrderCreated,
    TwapSubOrderCreated,
    TwapSubOrderFilled,
    TwapOrderCompleted,
    TwapOrderCancelled,
    IocCancelled,
    IocPartialCancel,
    FokRejected,
    GtxRejected,
}

impl EventKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PlaceOrder => "place_order",
            EventKind::CancelOrder => "cancel_order",
            EventKind::Trade => "trade",
            EventKind::ConditionalOrderPlaced => "conditional_order_placed",
            EventKind::ConditionalOrderTriggered => "conditional_order_triggered",
            EventKind::ConditionalOrderCancelled => "conditional_order_cancelled",
            EventKind::TrailingStopPlaced => "trailing_stop_placed",
            EventKind::TrailingStopTriggered => "trailing_stop_triggered",
            EventKind::TrailingStopCancelled => "trailing_stop_cancelled",
            EventKind::OcoPlaced => "oco_placed",
            EventKind::OcoTriggered => "oco_triggered",
            EventKind::OcoCancelled => "oco_cancelled",
            EventKind::ScaleOrderCreated => "scale_order_created",
            EventKind::ScaleOrderCancelled => "scale_order_cancelled",
            EventKind::TwapOrderCreated => "twap_order_created",
            EventKind::TwapSubOrderCreated => "twap_sub_order_created",
            EventKind::TwapSubOrderFilled => "twap_sub_order_filled",
            EventKind::TwapOrderCompleted => "twap_order_completed",
            EventKind::TwapOrderCancelled => "twap_order_cancelled",
            EventKind::IocCancelled => "ioc_cancelled",
            EventKind::IocPartialCancel => "ioc_partial_cancel",
            EventKind::FokRejected => "fok_rejected",
            EventKind::GtxRejected => "gtx_rejected",
        }
    }
}

/// A single emitted event: a stable kind plus a string attribute map.
/// `spec.md` §4.3 requires at minimum `kind, order_id, market_id, trader,
/// side, price, quantity` for order/fill/trigger events; `Event::order`
/// below is the standard constructor for that shape.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub attributes: BTreeMap<String, String>,
}

impl Event {
    #[must_use]
    pub fn order(
        kind: EventKind,
        order_id: OrderId,
        market_id: &MarketId,
        trader: &TraderId,
        side: Side,
        price: Price,
        quantity: Quantity,
    ) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert("order_id".into(), order_id.to_string());
        attributes.insert("market_id".into(), market_id.clone());
        attributes.insert("trader".into(), trader.clone());
        attributes.insert("side".into(), side.to_string());
        attributes.insert("price".into(), price.to_string());
        attributes.insert("quantity".into(), quantity.to_string());
        Self { kind, attributes }
    }

    #[must_use]
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// The engine's entire event-emission coupling surface. Tests supply an
/// in-memory sink and assert on its recorded events; production wires in
/// whatever telemetry/event-bus adapter the deployment uses.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Reference sink: records every event in arrival order behind a mutex.
/// Event emission is documented as thread-safe but unordered across
/// markets (`spec.md` §5); within a single task it is simply
/// append-ordered, which is enough for the scenario tests in §8 to assert
/// exact sequences.
#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingEventSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    #[must_use]
    pub fn count_of(&self, kind: EventKind) -> usize {
        self.events.lock().unwrap().iter().filter(|e| e.kind == kind).count()
    }
}

impl Clone for Event {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            attributes: self.attributes.clone(),
        }
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: Event) {
        tracing::trace!(kind = event.kind.as_str(), "event emitted");
        self.events.lock().unwrap().push(event);
    }
}

/// A no-op sink, used where a caller has nothing to observe events with.
#[derive(Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: Event) {}
}

/// A sink that fans out to multiple sinks, e.g. a [`RecordingEventSink`]
/// for tests plus the optional NATS publisher in production.
pub struct FanOutEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanOutEventSink {
    #[must_use]
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for FanOutEventSink {
    fn emit(&self, event: Event) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

#[cfg(feature = "nats")]
pub mod nats {
    //! Optional NATS publisher: events are serialized and published on a
    //! subject derived from the event kind.
    use super::{Event, EventSink};
    use async_nats::Client;

    pub struct NatsEventSink {
        client: Client,
        subject_prefix: String,
    }

    impl NatsEventSink {
        #[must_use]
        pub fn new(client: Client, subject_prefix: impl Into<String>) -> Self {
            Self {
                client,
                subject_prefix: subject_prefix.into(),
            }
        }
    }

    impl EventSink for NatsEventSink {
        fn emit(&self, event: Event) {
            let subject = format!("{}.{}", self.subject_prefix, event.kind.as_str());
            let payload = serde_json::to_vec(&event.attributes).unwrap_or_default();
            let client = self.client.clone();
            tokio::spawn(async move {
                if let Err(err) = client.publish(subject, payload.into()).await {
                    tracing::warn!(%err, "failed to publish event to nats");
                }
            });
        }
    }
}
