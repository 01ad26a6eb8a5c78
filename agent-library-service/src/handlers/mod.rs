pub mod agents;
pub mod metrics;
pub mod usage;
pub mod user;
pub mod webhook;
