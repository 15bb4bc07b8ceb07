//! In-process backends usable without any external database.

pub mod flat;

pub use flat::{DistanceMetric, FlatBackend, FlatOptions};
