use serde::{Deserialize, Deserializer, Serialize};

// ============================================================================
// Order Wire Model
// ============================================================================
//
// Field names match the inbound channel payload exactly. Decoding is lenient:
// absent fields take their zero value and unknown fields are ignored, so a
// structurally incomplete order reaches the validator instead of failing to
// decode. An explicit `null` counts as absent, as producers that serialize
// empty collections as `null` are common.
//
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Order {
    #[serde(deserialize_with = "null_as_default")]
    pub order_uid: String,
    #[serde(deserialize_with = "null_as_default")]
    pub track_number: String,
    #[serde(deserialize_with = "null_as_default")]
    pub entry: String,
    #[serde(deserialize_with = "null_as_default")]
    pub delivery: Delivery,
    #[serde(deserialize_with = "null_as_default")]
    pub payment: Payment,
    #[serde(deserialize_with = "null_as_default")]
    pub items: Vec<Item>,
    #[serde(deserialize_with = "null_as_default")]
    pub locale: String,
    #[serde(deserialize_with = "null_as_default")]
    pub internal_signature: String,
    #[serde(deserialize_with = "null_as_default")]
    pub customer_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub delivery_service: String,
    #[serde(deserialize_with = "null_as_default")]
    pub shardkey: String,
    #[serde(deserialize_with = "null_as_default")]
    pub sm_id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub date_created: String,
    #[serde(deserialize_with = "null_as_default")]
    pub oof_shard: String,
}

/// Recipient contact and address. `name`, `phone` and `zip` are mandatory.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Delivery {
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub phone: String,
    #[serde(deserialize_with = "null_as_default")]
    pub zip: String,
    #[serde(deserialize_with = "null_as_default")]
    pub city: String,
    #[serde(deserialize_with = "null_as_default")]
    pub address: String,
    #[serde(deserialize_with = "null_as_default")]
    pub region: String,
    #[serde(deserialize_with = "null_as_default")]
    pub email: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Payment {
    #[serde(deserialize_with = "null_as_default")]
    pub transaction: String,
    #[serde(deserialize_with = "null_as_default")]
    pub request_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub currency: String,
    #[serde(deserialize_with = "null_as_default")]
    pub provider: String,
    #[serde(deserialize_with = "null_as_default")]
    pub amount: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub payment_dt: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub bank: String,
    #[serde(deserialize_with = "null_as_default")]
    pub delivery_cost: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub goods_total: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub custom_fee: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Item {
    #[serde(deserialize_with = "null_as_default")]
    pub chrt_id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub track_number: String,
    #[serde(deserialize_with = "null_as_default")]
    pub price: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub rid: String,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub sale: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub size: String,
    #[serde(deserialize_with = "null_as_default")]
    pub total_price: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub nm_id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub brand: String,
    #[serde(deserialize_with = "null_as_default")]
    pub status: i64,
}

/// Treat an explicit JSON `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Order {
    /// Decode an order from a raw channel payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}
