//! Inbound webhook handling

pub mod processor;

pub use processor::WebhookProcessor;
