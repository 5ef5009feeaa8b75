//! # Ledger Facts
//!
//! Things downstream consumers (notifications, reporting, webhooks) care
//! about, published on a broadcast channel after the transaction that
//! produced them has committed.
//!
//! ```text
//! handler ── commit ──► FactBus::publish ──► subscriber 1 (server log)
//!                                        └─► subscriber N
//! ```
//!
//! A fact is never published for a rolled-back call. Publishing with no
//! subscriber is not an error.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use stockline_db::MovementRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "fact", rename_all = "snake_case")]
pub enum LedgerFact {
    OrderCompleted {
        tenant_id: String,
        order_id: String,
        order_number: String,
        total_cents: i64,
    },
    OrderVoided {
        tenant_id: String,
        order_id: String,
        order_number: String,
    },
    TransferShipped {
        tenant_id: String,
        transfer_id: String,
        reference: String,
    },
    TransferCompleted {
        tenant_id: String,
        transfer_id: String,
        reference: String,
    },
    PurchaseOrderReceived {
        tenant_id: String,
        purchase_order_id: String,
        reference: String,
        total_cost_cents: i64,
    },
    StockBelowThreshold {
        tenant_id: String,
        branch_id: String,
        product_id: String,
        balance: i64,
        threshold: i64,
    },
}

impl LedgerFact {
    pub fn tenant_id(&self) -> &str {
        match self {
            LedgerFact::OrderCompleted { tenant_id, .. }
            | LedgerFact::OrderVoided { tenant_id, .. }
            | LedgerFact::TransferShipped { tenant_id, .. }
            | LedgerFact::TransferCompleted { tenant_id, .. }
            | LedgerFact::PurchaseOrderReceived { tenant_id, .. }
            | LedgerFact::StockBelowThreshold { tenant_id, .. } => tenant_id,
        }
    }

    /// One `StockBelowThreshold` per movement that crossed its product's threshold.
    pub fn low_stock<'a>(records: impl IntoIterator<Item = &'a MovementRecord>) -> Vec<LedgerFact> {
        records
            .into_iter()
            .filter(|r| r.crossed_low_stock())
            .map(|r| LedgerFact::StockBelowThreshold {
                tenant_id: r.movement.tenant_id.clone(),
                branch_id: r.movement.branch_id.clone(),
                product_id: r.movement.product_id.clone(),
                balance: r.movement.balance_after,
                threshold: r.low_stock_threshold,
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct FactBus {
    tx: broadcast::Sender<LedgerFact>,
}

impl FactBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        FactBus { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerFact> {
        self.tx.subscribe()
    }

    pub fn publish(&self, fact: LedgerFact) {
        // Err only means nobody is listening
        if self.tx.send(fact).is_err() {
            debug!("Ledger fact dropped: no subscribers");
        }
    }

    pub fn publish_all(&self, facts: impl IntoIterator<Item = LedgerFact>) {
        for fact in facts {
            self.publish(fact);
        }
    }
}

impl Default for FactBus {
    fn default() -> Self {
        FactBus::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let bus = FactBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish_all([
            LedgerFact::TransferShipped {
                tenant_id: "t".into(),
                transfer_id: "x".into(),
                reference: "TRF-1".into(),
            },
            LedgerFact::TransferCompleted {
                tenant_id: "t".into(),
                transfer_id: "x".into(),
                reference: "TRF-1".into(),
            },
        ]);

        assert!(matches!(rx.recv().await.unwrap(), LedgerFact::TransferShipped { .. }));
        assert!(matches!(rx.recv().await.unwrap(), LedgerFact::TransferCompleted { .. }));
    }

    #[test]
    fn test_publish_without_subscribers() {
        FactBus::new(1).publish(LedgerFact::OrderVoided {
            tenant_id: "t".into(),
            order_id: "o".into(),
            order_number: "ORD-000001".into(),
        });
    }

    #[test]
    fn test_wire_shape() {
        let fact = LedgerFact::StockBelowThreshold {
            tenant_id: "t".into(),
            branch_id: "b".into(),
            product_id: "p".into(),
            balance: 3,
            threshold: 10,
        };
        let json = serde_json::to_value(&fact).unwrap();
        assert_eq!(json["fact"], "stock_below_threshold");
        assert_eq!(fact.tenant_id(), "t");
    }
}
