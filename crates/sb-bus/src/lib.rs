//! MQTT bus client for scriptbus
//!
//! Connects to the external broker, maintains the subscription registry,
//! discovers topics through a catch-all subscription, and fans incoming
//! messages out to matching handlers. Also provides a broker-less loopback
//! mode used by tests and broker-less deployments.

mod client;
mod config;
mod topic;

pub use client::{BusClient, BusMessage, HandlerFuture, MessageHandler, SubscriptionId};
pub use config::BrokerConfig;
pub use topic::topic_matches;
