//! corrlog Server — correlation middleware chain, traced client loop, and
//! the important-call demo service.

pub mod client;
pub mod correlation;
pub mod network;
pub mod service;

pub use client::{ClientConfig, ImportantClient, TracedTransport};
pub use network::{NetworkConfig, ServerModule};
pub use service::{FaultPolicy, ImportantStore};
