//! Closed enumeration of workspace event types.
//!
//! Wire names are `SCREAMING_SNAKE_CASE` (`ORDER_STATUS_CHANGED`). The core
//! never interprets the payload; the type only tells clients which local
//! store to refresh.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of change an event describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// A customer was created.
    CustomerCreated,
    /// A customer was updated.
    CustomerUpdated,
    /// A customer was deleted.
    CustomerDeleted,
    /// A product was created.
    ProductCreated,
    /// A product was updated.
    ProductUpdated,
    /// A product was deleted.
    ProductDeleted,
    /// A product's stock level changed.
    ProductStockChanged,
    /// An order was created.
    OrderCreated,
    /// An order was updated.
    OrderUpdated,
    /// An order moved to a new status.
    OrderStatusChanged,
    /// An order was deleted.
    OrderDeleted,
    /// An invoice was created.
    InvoiceCreated,
    /// An invoice was updated.
    InvoiceUpdated,
    /// An invoice was paid.
    InvoicePaid,
    /// An invoice was deleted.
    InvoiceDeleted,
    /// Any other entity was created.
    EntityCreated,
    /// Any other entity was updated.
    EntityUpdated,
    /// Any other entity was deleted.
    EntityDeleted,
    /// Any other entity moved to a new status.
    EntityStatusChanged,
}

/// Every event type, in declaration order.
pub const ALL_EVENT_TYPES: [EventType; 19] = [
    EventType::CustomerCreated,
    EventType::CustomerUpdated,
    EventType::CustomerDeleted,
    EventType::ProductCreated,
    EventType::ProductUpdated,
    EventType::ProductDeleted,
    EventType::ProductStockChanged,
    EventType::OrderCreated,
    EventType::OrderUpdated,
    EventType::OrderStatusChanged,
    EventType::OrderDeleted,
    EventType::InvoiceCreated,
    EventType::InvoiceUpdated,
    EventType::InvoicePaid,
    EventType::InvoiceDeleted,
    EventType::EntityCreated,
    EventType::EntityUpdated,
    EventType::EntityDeleted,
    EventType::EntityStatusChanged,
];

/// The generic action behind an event type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventAction {
    /// Entity created.
    Created,
    /// Entity updated.
    Updated,
    /// Entity deleted.
    Deleted,
    /// Entity status changed.
    StatusChanged,
    /// Domain-specific change (stock movement, payment).
    Domain,
}

impl EventType {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CustomerCreated => "CUSTOMER_CREATED",
            Self::CustomerUpdated => "CUSTOMER_UPDATED",
            Self::CustomerDeleted => "CUSTOMER_DELETED",
            Self::ProductCreated => "PRODUCT_CREATED",
            Self::ProductUpdated => "PRODUCT_UPDATED",
            Self::ProductDeleted => "PRODUCT_DELETED",
            Self::ProductStockChanged => "PRODUCT_STOCK_CHANGED",
            Self::OrderCreated => "ORDER_CREATED",
            Self::OrderUpdated => "ORDER_UPDATED",
            Self::OrderStatusChanged => "ORDER_STATUS_CHANGED",
            Self::OrderDeleted => "ORDER_DELETED",
            Self::InvoiceCreated => "INVOICE_CREATED",
            Self::InvoiceUpdated => "INVOICE_UPDATED",
            Self::InvoicePaid => "INVOICE_PAID",
            Self::InvoiceDeleted => "INVOICE_DELETED",
            Self::EntityCreated => "ENTITY_CREATED",
            Self::EntityUpdated => "ENTITY_UPDATED",
            Self::EntityDeleted => "ENTITY_DELETED",
            Self::EntityStatusChanged => "ENTITY_STATUS_CHANGED",
        }
    }

    /// The generic action this type represents.
    pub fn action(self) -> EventAction {
        match self {
            Self::CustomerCreated
            | Self::ProductCreated
            | Self::OrderCreated
            | Self::InvoiceCreated
            | Self::EntityCreated => EventAction::Created,
            Self::CustomerUpdated
            | Self::ProductUpdated
            | Self::OrderUpdated
            | Self::InvoiceUpdated
            | Self::EntityUpdated => EventAction::Updated,
            Self::CustomerDeleted
            | Self::ProductDeleted
            | Self::OrderDeleted
            | Self::InvoiceDeleted
            | Self::EntityDeleted => EventAction::Deleted,
            Self::OrderStatusChanged | Self::EntityStatusChanged => EventAction::StatusChanged,
            Self::ProductStockChanged | Self::InvoicePaid => EventAction::Domain,
        }
    }

    /// The entity type tag this event type implies, if it is entity-specific.
    pub fn default_entity_type(self) -> Option<&'static str> {
        match self {
            Self::CustomerCreated | Self::CustomerUpdated | Self::CustomerDeleted => {
                Some("customer")
            }
            Self::ProductCreated
            | Self::ProductUpdated
            | Self::ProductDeleted
            | Self::ProductStockChanged => Some("product"),
            Self::OrderCreated
            | Self::OrderUpdated
            | Self::OrderStatusChanged
            | Self::OrderDeleted => Some("order"),
            Self::InvoiceCreated
            | Self::InvoiceUpdated
            | Self::InvoicePaid
            | Self::InvoiceDeleted => Some("invoice"),
            Self::EntityCreated
            | Self::EntityUpdated
            | Self::EntityDeleted
            | Self::EntityStatusChanged => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown event type name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownEventType(pub String);

impl fmt::Display for UnknownEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event type: {}", self.0)
    }
}

impl std::error::Error for UnknownEventType {}

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_EVENT_TYPES
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn as_str_matches_serde() {
        for t in ALL_EVENT_TYPES {
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()), "mismatch for {t:?}");
        }
    }

    #[test]
    fn from_str_roundtrip() {
        for t in ALL_EVENT_TYPES {
            assert_eq!(t.as_str().parse::<EventType>().unwrap(), t);
        }
    }

    #[test]
    fn unknown_name_rejected() {
        let err = "ORDER_EXPLODED".parse::<EventType>().unwrap_err();
        assert_eq!(err.to_string(), "unknown event type: ORDER_EXPLODED");
    }

    #[test]
    fn all_event_types_unique() {
        let mut names: Vec<_> = ALL_EVENT_TYPES.iter().map(|t| t.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), ALL_EVENT_TYPES.len());
    }

    #[test]
    fn actions() {
        assert_eq!(EventType::OrderCreated.action(), EventAction::Created);
        assert_eq!(EventType::CustomerDeleted.action(), EventAction::Deleted);
        assert_eq!(EventType::OrderStatusChanged.action(), EventAction::StatusChanged);
        assert_eq!(EventType::InvoicePaid.action(), EventAction::Domain);
        assert_eq!(EventType::ProductStockChanged.action(), EventAction::Domain);
    }

    #[test]
    fn entity_types() {
        const EXPECTED: &[(EventType, Option<&str>)] = &[
            (EventType::CustomerUpdated, Some("customer")),
            (EventType::ProductStockChanged, Some("product")),
            (EventType::OrderStatusChanged, Some("order")),
            (EventType::InvoicePaid, Some("invoice")),
            (EventType::EntityCreated, None),
        ];
        for (t, entity) in EXPECTED {
            assert_eq!(t.default_entity_type(), *entity, "entity type for {t}");
        }
    }
}
