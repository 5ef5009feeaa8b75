//! # stockline-sync
//!
//! Workflows and the sync gateway for Stockline.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          stockline-sync                                 │
//! │                                                                         │
//! │  Terminal envelope {uuid, type, data}                                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────┐     ┌──────────────────────────────────────────────┐  │
//! │  │ SyncGateway │────►│ Handlers                                     │  │
//! │  └─────────────┘     │  OrderHandler     sync / complete / void     │  │
//! │                      │  TransferHandler  request → ship → receive   │  │
//! │  online endpoints ──►│  PurchaseHandler  create / receive / cancel  │  │
//! │                      │  StockHandler     adjust / history / audit   │  │
//! │                      └──────────────┬───────────────────────────────┘  │
//! │                                     │                                   │
//! │          ┌──────────────────────────┼──────────────────────┐           │
//! │          ▼                          ▼                      ▼           │
//! │   StockLocks                 stockline-db             FactBus          │
//! │   (per product)              (ledger, tx)             (after commit)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! let gateway = SyncGateway::connect(&GatewayConfig::load(None)?).await?;
//! let tenant = TenantContext::new("acme").with_actor("till-3");
//!
//! let reply = gateway.process(&tenant, &body).await;
//! // reply.http_status, serde_json::to_value(&reply)
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod facts;
pub mod gateway;
pub mod handlers;
pub mod locks;
pub mod protocol;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::GatewayConfig;
pub use error::{SyncError, SyncResult};
pub use facts::{FactBus, LedgerFact};
pub use gateway::SyncGateway;
pub use handlers::{
    HandlerContext, OrderHandler, PurchaseHandler, StockHandler, Synced, TransferHandler, Transitioned,
};
pub use locks::{StockGuard, StockLocks};
pub use protocol::{Envelope, EnvelopeType, SyncOutcome, SyncReply};
