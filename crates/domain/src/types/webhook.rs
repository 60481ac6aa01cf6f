//! HubSpot webhook event types

use serde::{Deserialize, Serialize};

use super::sync::{ObjectType, SyncOperation};

/// One event from a HubSpot webhook delivery (deliveries are JSON arrays)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub event_id: u64,
    #[serde(default)]
    pub subscription_id: u64,
    #[serde(default)]
    pub portal_id: u64,
    #[serde(default)]
    pub occurred_at: i64,
    pub subscription_type: String,
    #[serde(default)]
    pub attempt_number: u32,
    pub object_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_value: Option<String>,
}

/// Supported subscription types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WebhookEventType {
    ContactCreation,
    ContactPropertyChange,
    ContactDeletion,
    CompanyCreation,
    CompanyPropertyChange,
    CompanyDeletion,
    DealCreation,
    DealPropertyChange,
    DealDeletion,
}

impl WebhookEventType {
    const TABLE: [(&'static str, Self); 9] = [
        ("contact.creation", Self::ContactCreation),
        ("contact.propertychange", Self::ContactPropertyChange),
        ("contact.deletion", Self::ContactDeletion),
        ("company.creation", Self::CompanyCreation),
        ("company.propertychange", Self::CompanyPropertyChange),
        ("company.deletion", Self::CompanyDeletion),
        ("deal.creation", Self::DealCreation),
        ("deal.propertychange", Self::DealPropertyChange),
        ("deal.deletion", Self::DealDeletion),
    ];

    /// Map a HubSpot `subscriptionType` string. Unknown types yield `None`.
    pub fn from_subscription_type(subscription_type: &str) -> Option<Self> {
        let needle = subscription_type.to_ascii_lowercase();
        Self::TABLE.iter().find(|(name, _)| *name == needle).map(|(_, kind)| *kind)
    }

    pub fn object_type(&self) -> ObjectType {
        match self {
            Self::ContactCreation | Self::ContactPropertyChange | Self::ContactDeletion => {
                ObjectType::Contact
            }
            Self::CompanyCreation | Self::CompanyPropertyChange | Self::CompanyDeletion => {
                ObjectType::Company
            }
            Self::DealCreation | Self::DealPropertyChange | Self::DealDeletion => ObjectType::Deal,
        }
    }

    pub fn operation(&self) -> SyncOperation {
        match self {
            Self::ContactCreation | Self::CompanyCreation | Self::DealCreation => {
                SyncOperation::Create
            }
            Self::ContactPropertyChange
            | Self::CompanyPropertyChange
            | Self::DealPropertyChange => SyncOperation::Update,
            Self::ContactDeletion | Self::CompanyDeletion | Self::DealDeletion => {
                SyncOperation::Delete
            }
        }
    }
}

/// What the processor did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookAction {
    Enqueued,
    DuplicateSkipped,
    Ignored,
    Rejected,
}

crate::impl_wire_conversions!(WebhookAction {
    Enqueued => "enqueued",
    DuplicateSkipped => "duplicate_skipped",
    Ignored => "ignored",
    Rejected => "rejected"
});

/// Per-event processing outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResult {
    pub event_id: u64,
    pub success: bool,
    pub action: WebhookAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_item_id: Option<String>,
}

impl WebhookResult {
    pub fn enqueued(event_id: u64, queue_item_id: String) -> Self {
        Self {
            event_id,
            success: true,
            action: WebhookAction::Enqueued,
            error: None,
            queue_item_id: Some(queue_item_id),
        }
    }

    pub fn duplicate(event_id: u64) -> Self {
        Self {
            event_id,
            success: true,
            action: WebhookAction::DuplicateSkipped,
            error: None,
            queue_item_id: None,
        }
    }

    pub fn ignored(event_id: u64, reason: impl Into<String>) -> Self {
        Self {
            event_id,
            success: true,
            action: WebhookAction::Ignored,
            error: Some(reason.into()),
            queue_item_id: None,
        }
    }

    pub fn rejected(event_id: u64, error: impl Into<String>) -> Self {
        Self {
            event_id,
            success: false,
            action: WebhookAction::Rejected,
            error: Some(error.into()),
            queue_item_id: None,
        }
    }
}
