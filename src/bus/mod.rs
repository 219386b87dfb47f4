//! Notification bus: filters and fanout

pub mod filter;
pub mod hub;

pub use filter::{FilterSpec, KeyPredicate, SubscriptionFilter};
pub use hub::{BusConfig, BusConnection, Delivery, NotificationBus, SubscriptionId};
