pub mod chat;
pub mod metrics;
pub mod predict;
