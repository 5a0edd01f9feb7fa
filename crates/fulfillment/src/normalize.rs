//! Tolerant extraction from supplier payloads.
//!
//! The supplier's responses are structurally inconsistent: the same datum
//! shows up under different field names, nested or not, as a string or a
//! number. Each function here tries a fixed, ordered list of shapes and
//! returns the first match.

use domain::{FulfillmentStatus, Money};
use order_store::SupplierOrderRef;
use serde_json::Value;

/// Array wrappers a tracking response may use, tried in order.
pub const TRACKING_LIST_KEYS: &[&str] =
    &["trackingInfoList", "trackingInfo", "logisticTrackingInfo"];

pub const TRACKING_NUMBER_ALIASES: &[&str] = &[
    "trackingNumber",
    "tracking_number",
    "trackNumber",
    "trackingNo",
    "logisticsNumber",
];
pub const TRACKING_URL_ALIASES: &[&str] =
    &["trackingUrl", "tracking_url", "trackUrl", "logisticsUrl"];
pub const CARRIER_ALIASES: &[&str] = &[
    "logisticName",
    "carrier",
    "logisticsName",
    "shippingCarrier",
];
pub const STATUS_ALIASES: &[&str] = &[
    "trackingStatus",
    "status",
    "orderStatus",
    "logisticStatus",
    "deliveryStatus",
];

/// Dotted paths for the supplier order id in a create-order response.
pub const ORDER_ID_ALIASES: &[&str] = &[
    "orderId",
    "order_id",
    "id",
    "order.orderId",
    "order.id",
    "data.orderId",
    "data.order_id",
    "data.id",
];
pub const ORDER_NUMBER_ALIASES: &[&str] = &[
    "orderNumber",
    "orderNum",
    "order_number",
    "orderNo",
    "order.orderNumber",
    "order.orderNum",
    "data.orderNumber",
    "data.orderNum",
];

pub const STOCK_ALIASES: &[&str] = &[
    "storageNum",
    "totalInventory",
    "inventory",
    "stock",
    "quantity",
];
pub const FREIGHT_PRICE_ALIASES: &[&str] = &["logisticPrice", "freight", "price", "amount"];

/// Fields pulled from a tracking record. Blank values are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackingFields {
    pub tracking_number: Option<String>,
    pub tracking_url: Option<String>,
    pub carrier: Option<String>,
    pub status: Option<String>,
}

/// Looks up a dotted path (`"order.orderId"`) in a JSON value.
fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |v, key| v.get(key))
}

/// Renders a scalar as a trimmed, non-empty string.
fn scalar_string(value: &Value) -> Option<String> {
    let s = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

/// Returns the first alias that resolves to a non-blank scalar.
pub fn first_string(value: &Value, aliases: &[&str]) -> Option<String> {
    aliases
        .iter()
        .find_map(|path| lookup(value, path).and_then(scalar_string))
}

fn first_number(value: &Value, aliases: &[&str]) -> Option<f64> {
    aliases.iter().find_map(|path| match lookup(value, path)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Picks the record describing the shipment out of a tracking payload.
///
/// Tries `trackingInfoList[0]`, `trackingInfo[0]`, `logisticTrackingInfo[0]`,
/// then a bare array's first element, then the payload itself.
pub fn select_tracking_record(payload: &Value) -> &Value {
    for key in TRACKING_LIST_KEYS {
        if let Some(first) = payload.get(key).and_then(|v| v.get(0)) {
            return first;
        }
    }
    if let Some(first) = payload.as_array().and_then(|a| a.first()) {
        return first;
    }
    payload
}

/// Extracts tracking number, URL, carrier and status text from a record.
pub fn extract_tracking(record: &Value) -> TrackingFields {
    TrackingFields {
        tracking_number: first_string(record, TRACKING_NUMBER_ALIASES),
        tracking_url: first_string(record, TRACKING_URL_ALIASES),
        carrier: first_string(record, CARRIER_ALIASES),
        status: first_string(record, STATUS_ALIASES),
    }
}

/// Status phrases that mention "delivered" without meaning it.
const NOT_DELIVERED_PHRASES: &[&str] = &["undelivered", "not delivered", "not_delivered"];

/// Decides the status a tracking poll justifies.
///
/// Status text containing "delivered" means delivered, unless it is a
/// negative such as "Undelivered"; otherwise a tracking number means
/// shipped. Returns `None` when nothing moves forward from `current`.
pub fn derive_next_status(
    current: FulfillmentStatus,
    fields: &TrackingFields,
) -> Option<FulfillmentStatus> {
    let delivered = fields.status.as_deref().is_some_and(is_delivered_text);

    let next = if delivered {
        FulfillmentStatus::Delivered
    } else if fields.tracking_number.is_some() {
        FulfillmentStatus::Shipped
    } else {
        return None;
    };
    current.can_advance_to(next).then_some(next)
}

fn is_delivered_text(status: &str) -> bool {
    let status = status.to_ascii_lowercase();
    status.contains("delivered") && !NOT_DELIVERED_PHRASES.iter().any(|p| status.contains(p))
}

/// Extracts the supplier's id and number from a create-order response.
///
/// Either one stands in for the other when only one is present.
pub fn extract_supplier_order_ref(response: &Value) -> Option<SupplierOrderRef> {
    let id = first_string(response, ORDER_ID_ALIASES);
    let number = first_string(response, ORDER_NUMBER_ALIASES);
    match (id, number) {
        (Some(order_id), Some(order_number)) => Some(SupplierOrderRef {
            order_id,
            order_number,
        }),
        (Some(id), None) => Some(SupplierOrderRef {
            order_id: id.clone(),
            order_number: id,
        }),
        (None, Some(number)) => Some(SupplierOrderRef {
            order_id: number.clone(),
            order_number: number,
        }),
        (None, None) => None,
    }
}

/// Extracts an available-stock count from a stock response.
///
/// A list of per-warehouse entries is summed.
pub fn extract_stock(response: &Value) -> Option<u32> {
    let to_count = |n: f64| n.max(0.0).round() as u32;
    match response {
        Value::Array(entries) => {
            let counts: Vec<u32> = entries
                .iter()
                .filter_map(|e| first_number(e, STOCK_ALIASES).map(to_count))
                .collect();
            (!counts.is_empty()).then(|| counts.iter().sum())
        }
        Value::Number(n) => n.as_f64().map(to_count),
        other => first_number(other, STOCK_ALIASES).map(to_count),
    }
}

/// Extracts the cheapest positive price from a freight response.
///
/// Amounts are in major currency units.
pub fn extract_freight(response: &Value) -> Option<Money> {
    let price = match response {
        Value::Array(options) => options
            .iter()
            .filter_map(|o| first_number(o, FREIGHT_PRICE_ALIASES))
            .filter(|p| *p > 0.0)
            .min_by(f64::total_cmp),
        Value::Number(n) => n.as_f64(),
        other => first_number(other, FREIGHT_PRICE_ALIASES),
    }?;
    (price > 0.0).then(|| Money::from_major(price))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use FulfillmentStatus::*;

    #[test]
    fn test_select_tracking_record_shapes() {
        let list = json!({"trackingInfoList": [{"trackingNumber": "A"}]});
        let info = json!({"trackingInfo": [{"trackingNumber": "B"}]});
        let logistic = json!({"logisticTrackingInfo": [{"trackingNumber": "C"}]});
        let bare = json!([{"trackingNumber": "D"}]);
        let flat = json!({"trackingNumber": "E"});

        for (payload, expected) in [
            (list, "A"),
            (info, "B"),
            (logistic, "C"),
            (bare, "D"),
            (flat, "E"),
        ] {
            let record = select_tracking_record(&payload);
            assert_eq!(record["trackingNumber"], expected);
        }
    }

    #[test]
    fn test_empty_wrapper_falls_through_to_payload() {
        let payload = json!({"trackingInfoList": [], "trackingNumber": "X"});
        assert_eq!(select_tracking_record(&payload)["trackingNumber"], "X");
    }

    #[test]
    fn test_extract_tracking_aliases() {
        let record = json!({
            "trackNumber": "1Z999",
            "trackUrl": "https://track.example/1Z999",
            "logisticName": "UPS",
            "status": "In Transit"
        });
        let fields = extract_tracking(&record);
        assert_eq!(fields.tracking_number.as_deref(), Some("1Z999"));
        assert_eq!(
            fields.tracking_url.as_deref(),
            Some("https://track.example/1Z999")
        );
        assert_eq!(fields.carrier.as_deref(), Some("UPS"));
        assert_eq!(fields.status.as_deref(), Some("In Transit"));
    }

    #[test]
    fn test_blank_tracking_number_is_none() {
        let fields = extract_tracking(&json!({"trackingNumber": "  "}));
        assert_eq!(fields.tracking_number, None);
    }

    #[test]
    fn test_derive_next_status() {
        let delivered = TrackingFields {
            status: Some("DELIVERED to front desk".to_string()),
            ..Default::default()
        };
        let shipped = TrackingFields {
            tracking_number: Some("1Z".to_string()),
            ..Default::default()
        };
        let unknown = TrackingFields {
            status: Some("unknown".to_string()),
            ..Default::default()
        };

        assert_eq!(derive_next_status(Processing, &delivered), Some(Delivered));
        assert_eq!(derive_next_status(Processing, &shipped), Some(Shipped));
        assert_eq!(derive_next_status(Processing, &unknown), None);
    }

    #[test]
    fn test_negative_delivery_text_is_not_delivered() {
        for text in ["Undelivered", "Not delivered", "NOT_DELIVERED"] {
            let fields = TrackingFields {
                tracking_number: Some("1Z".to_string()),
                status: Some(text.to_string()),
                ..Default::default()
            };
            assert_eq!(derive_next_status(Processing, &fields), Some(Shipped));
        }
    }

    #[test]
    fn test_derive_next_status_never_regresses() {
        let shipped = TrackingFields {
            tracking_number: Some("1Z".to_string()),
            ..Default::default()
        };
        assert_eq!(derive_next_status(Shipped, &shipped), None);
        assert_eq!(derive_next_status(Delivered, &shipped), None);
    }

    #[test]
    fn test_extract_supplier_order_ref_aliases() {
        let flat = json!({"orderId": "S-1", "orderNum": "N-1"});
        let nested = json!({"order": {"orderId": "S-2", "orderNumber": "N-2"}});
        let numeric = json!({"data": {"orderId": 12345}});

        let r = extract_supplier_order_ref(&flat).unwrap();
        assert_eq!(
            (r.order_id.as_str(), r.order_number.as_str()),
            ("S-1", "N-1")
        );
        let r = extract_supplier_order_ref(&nested).unwrap();
        assert_eq!(
            (r.order_id.as_str(), r.order_number.as_str()),
            ("S-2", "N-2")
        );
        let r = extract_supplier_order_ref(&numeric).unwrap();
        assert_eq!(
            (r.order_id.as_str(), r.order_number.as_str()),
            ("12345", "12345")
        );
        let bare = json!({"message": "ok"});
        assert!(extract_supplier_order_ref(&bare).is_none());
    }

    #[test]
    fn test_extract_stock_sums_warehouses() {
        let entries = json!([{"storageNum": 3}, {"storageNum": "4"}]);
        assert_eq!(extract_stock(&entries), Some(7));
        assert_eq!(extract_stock(&json!({"inventory": 12})), Some(12));
        assert_eq!(extract_stock(&json!({"other": 1})), None);
    }

    #[test]
    fn test_extract_freight_takes_cheapest_positive() {
        let options = json!([
            {"logisticName": "Express", "logisticPrice": 12.5},
            {"logisticName": "Free?", "logisticPrice": 0},
            {"logisticName": "Standard", "logisticPrice": "6.40"}
        ]);
        assert_eq!(extract_freight(&options), Some(Money::from_cents(640)));
        assert_eq!(extract_freight(&json!([])), None);
        assert_eq!(extract_freight(&json!({"price": 0})), None);
    }
}
