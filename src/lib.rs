//! slated — a facility-booking engine speaking the Postgres wire protocol.
//!
//! Resources (grounds, courts, halls) expose a grid of time slots per date;
//! bookings claim a (resource, date, slot) triple and move through a
//! role-gated state machine (pending → approved/rejected → completed/
//! cancelled). State lives in memory behind per-resource locks and is made
//! durable through an append-only WAL per site.

pub mod auth;
pub mod compactor;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod site;
pub mod sql;
pub mod tls;
pub mod wal;
pub mod wire;
