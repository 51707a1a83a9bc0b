//! Business-logic collaborators called from the request handlers.

pub mod important;

pub use important::{FaultPolicy, ImportantCallError, ImportantStore, MAX_DATA_LENGTH};
