use crate::models::Order;

// ============================================================================
// Order Validation
// ============================================================================
//
// Pure checks over a decoded order. Rejected orders are never persisted.
// New structural rules belong here; callers only see `ValidationError`.
//
// ============================================================================

/// Mandatory order fields, in the order they are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredField {
    OrderUid,
    TrackNumber,
    DeliveryName,
    DeliveryPhone,
    DeliveryZip,
}

impl RequiredField {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequiredField::OrderUid => "order_uid",
            RequiredField::TrackNumber => "track_number",
            RequiredField::DeliveryName => "delivery.name",
            RequiredField::DeliveryPhone => "delivery.phone",
            RequiredField::DeliveryZip => "delivery.zip",
        }
    }
}

impl std::fmt::Display for RequiredField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Required field is empty: {0}")]
    MissingField(RequiredField),
}

impl ValidationError {
    pub fn field(&self) -> RequiredField {
        match self {
            ValidationError::MissingField(field) => *field,
        }
    }
}

/// Validate an order, reporting the first empty mandatory field.
pub fn validate(order: &Order) -> Result<(), ValidationError> {
    let checks = [
        (RequiredField::OrderUid, order.order_uid.as_str()),
        (RequiredField::TrackNumber, order.track_number.as_str()),
        (RequiredField::DeliveryName, order.delivery.name.as_str()),
        (RequiredField::DeliveryPhone, order.delivery.phone.as_str()),
        (RequiredField::DeliveryZip, order.delivery.zip.as_str()),
    ];

    for (field, value) in checks {
        if value.is_empty() {
            return Err(ValidationError::MissingField(field));
        }
    }

    Ok(())
}
