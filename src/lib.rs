//! Event/resource allocation engine with conflict detection, backed by a
//! write-ahead log and served over a JSON-lines TCP protocol.

pub mod command;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod wal;
pub mod wire;
