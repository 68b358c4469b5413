//! Star-schema population from the operational graph

pub mod derive;
pub mod transformer;

pub use transformer::{AnalyticsTransformer, TransformStats};
