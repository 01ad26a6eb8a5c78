pub mod agents;
pub mod usage;
pub mod user;
pub mod webhook;
