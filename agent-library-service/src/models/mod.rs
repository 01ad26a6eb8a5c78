pub mod agent;
pub mod usage;
pub mod user;

pub use agent::Agent;
pub use usage::{RecordedUsage, UserUsage};
pub use user::{dedupe_favorites, ExternalAccount, User, UserPreferences, UserProfile};
