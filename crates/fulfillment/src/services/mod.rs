//! External collaborators of the fulfillment core and in-memory implementations.

pub mod notifier;
pub mod provider;

pub use notifier::{InMemoryNotifier, Notification, Notifier, TracingNotifier};
pub use provider::{InMemoryProvider, ProvisioningProvider, to_upsert};
