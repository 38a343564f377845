use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use trading_core::Market;

// ---------------------------------------------------------------------------
// Order types (broker-agnostic)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub market: Market,
    pub ticker: String,
    pub quantity: u64,
    /// Reference price. Ignored by the venue for market orders.
    pub price: f64,
    pub side: OrderSide,
    pub order_type: OrderType,
}

impl OrderRequest {
    pub fn buy(market: Market, ticker: impl Into<String>, quantity: u64, price: f64) -> Self {
        Self {
            market,
            ticker: ticker.into(),
            quantity,
            price,
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
        }
    }

    pub fn sell(market: Market, ticker: impl Into<String>, quantity: u64, price: f64) -> Self {
        Self {
            market,
            ticker: ticker.into(),
            quantity,
            price,
            side: OrderSide::Sell,
            order_type: OrderType::Limit,
        }
    }

    pub fn market_order(mut self) -> Self {
        self.order_type = OrderType::Market;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub ticker: String,
    pub side: OrderSide,
    pub quantity: u64,
    pub status: String,
    pub submitted_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Gateway trait
// ---------------------------------------------------------------------------

/// Order routing to a venue. The simulated ledger stays the source of truth
/// for positions and cash; the gateway only mirrors orders outward.
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    /// Submit an order
    async fn place_order(&self, order: OrderRequest) -> Result<OrderAck>;

    /// Whether this is a paper/simulated venue
    fn is_paper(&self) -> bool;

    /// Gateway name for logging
    fn broker_name(&self) -> &str;
}

/// Gateway that acknowledges every order without sending it anywhere.
#[derive(Default)]
pub struct DryRunGateway {
    orders: Mutex<Vec<OrderRequest>>,
    reject_all: AtomicBool,
}

impl DryRunGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Orders seen so far, oldest first.
    pub fn submitted(&self) -> Vec<OrderRequest> {
        self.orders.lock().clone()
    }

    /// Make subsequent orders fail, to exercise rejection paths.
    pub fn set_reject_all(&self, reject: bool) {
        self.reject_all.store(reject, Ordering::Relaxed);
    }
}

#[async_trait]
impl ExecutionGateway for DryRunGateway {
    async fn place_order(&self, order: OrderRequest) -> Result<OrderAck> {
        if self.reject_all.load(Ordering::Relaxed) {
            anyhow::bail!("Dry-run gateway rejecting {} {:?}", order.ticker, order.side);
        }
        if order.quantity == 0 {
            anyhow::bail!("Order quantity must be positive");
        }

        tracing::info!(
            market = %order.market,
            ticker = %order.ticker,
            side = ?order.side,
            quantity = order.quantity,
            price = order.price,
            "Dry-run order accepted"
        );

        let ack = OrderAck {
            order_id: uuid::Uuid::new_v4().to_string(),
            ticker: order.ticker.clone(),
            side: order.side,
            quantity: order.quantity,
            status: "accepted".to_string(),
            submitted_at: Utc::now(),
        };
        self.orders.lock().push(order);
        Ok(ack)
    }

    fn is_paper(&self) -> bool {
        true
    }

    fn broker_name(&self) -> &str {
        "dry-run"
    }
}
