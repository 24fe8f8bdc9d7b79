use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{fmt, str::FromStr};

use crate::error::{AppError, Result};

pub const MAX_NAME_LEN: usize = 63;
pub const MAX_PROMOTION_ID_LEN: usize = 63;
pub const MAX_DESCRIPTION_LEN: usize = 255;

/// Keys every inbound promotion body must carry.
pub const REQUIRED_FIELDS: [&str; 7] = [
    "name",
    "promotion_id",
    "start_date",
    "end_date",
    "promotion_type",
    "promotion_amount",
    "promotion_description",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PromotionType {
    #[default]
    Discount,
    Flash,
    Coupon,
}

impl PromotionType {
    pub const ALL: [PromotionType; 3] = [Self::Discount, Self::Flash, Self::Coupon];

    pub fn as_str(&self) -> &'static str {
        match self {
            PromotionType::Discount => "DISCOUNT",
            PromotionType::Flash => "FLASH",
            PromotionType::Coupon => "COUPON",
        }
    }
}

impl fmt::Display for PromotionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PromotionType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AppError::Validation(format!("Invalid promotion_type: {}", s)))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromotionState {
    #[default]
    Active,
    Canceled,
}

impl PromotionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromotionState::Active => "active",
            PromotionState::Canceled => "canceled",
        }
    }
}

impl fmt::Display for PromotionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PromotionState {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(PromotionState::Active),
            "canceled" | "cancelled" => Ok(PromotionState::Canceled),
            _ => Err(AppError::Validation(format!("Invalid state: {}", s))),
        }
    }
}

/// A discount, flash sale or coupon offered over a date range.
///
/// `id` is assigned by the store; it is `None` until the first successful
/// create and is never taken from client input.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Promotion {
    pub id: Option<i64>,
    pub name: String,
    pub promotion_id: String,
    pub start_date: NaiveDateTime,
    pub end_date: NaiveDateTime,
    pub promotion_type: PromotionType,
    pub promotion_amount: f64,
    pub promotion_description: String,
    pub usage_count: i32,
    pub state: PromotionState,
}

impl Promotion {
    /// Projects the promotion onto its JSON wire form.
    pub fn serialize(&self) -> Value {
        // Every field is a plain scalar, so this cannot fail
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Populates the promotion from an untyped JSON body.
    ///
    /// Every key is validated before any field is assigned. `usage_count` and
    /// `state` are optional and keep their current values when absent.
    pub fn deserialize(mut self, data: &Value) -> Result<Self> {
        let map = data.as_object().ok_or_else(|| {
            AppError::Validation(
                "Invalid Promotion: body of request contained bad or no data".to_string(),
            )
        })?;

        if let Some(missing) = REQUIRED_FIELDS
            .iter()
            .find(|key| map.get(**key).map_or(true, Value::is_null))
        {
            return Err(AppError::Validation(format!(
                "Invalid Promotion: missing {}",
                missing
            )));
        }

        // Client ids are only checked for shape; identity comes from the store
        if let Some(id) = map.get("id").filter(|v| !v.is_null()) {
            read_integer(id, "id")?;
        }

        let name = read_text(map, "name", MAX_NAME_LEN)?;
        let promotion_id = read_text(map, "promotion_id", MAX_PROMOTION_ID_LEN)?;
        let start_date = read_timestamp(map, "start_date")?;
        let end_date = read_timestamp(map, "end_date")?;
        let promotion_type = read_string(map, "promotion_type")?.parse::<PromotionType>()?;
        let promotion_amount = read_amount(map)?;
        let promotion_description = read_string(map, "promotion_description")?;
        if promotion_description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(AppError::Validation(format!(
                "Invalid Promotion: promotion_description exceeds {} characters",
                MAX_DESCRIPTION_LEN
            )));
        }

        let usage_count = match map.get("usage_count").filter(|v| !v.is_null()) {
            Some(value) => {
                let count = read_integer(value, "usage_count")?;
                i32::try_from(count)
                    .ok()
                    .filter(|c| *c >= 0)
                    .ok_or_else(|| {
                        AppError::Validation(
                            "Invalid Promotion: usage_count must be a non-negative integer"
                                .to_string(),
                        )
                    })?
            }
            None => self.usage_count,
        };

        let state = match map.get("state").filter(|v| !v.is_null()) {
            Some(_) => read_string(map, "state")?.parse::<PromotionState>()?,
            None => self.state,
        };

        self.name = name;
        self.promotion_id = promotion_id;
        self.start_date = start_date;
        self.end_date = end_date;
        self.promotion_type = promotion_type;
        self.promotion_amount = promotion_amount;
        self.promotion_description = promotion_description;
        self.usage_count = usage_count;
        self.state = state;

        Ok(self)
    }

    pub fn is_expired(&self, now: NaiveDateTime) -> bool {
        self.end_date < now
    }

    pub fn is_active(&self) -> bool {
        self.state == PromotionState::Active
    }
}

fn read_string(map: &Map<String, Value>, key: &str) -> Result<String> {
    match map.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(AppError::Validation(format!(
            "Invalid Promotion: {} must be a string",
            key
        ))),
    }
}

fn read_text(map: &Map<String, Value>, key: &str, max_len: usize) -> Result<String> {
    let value = read_string(map, key)?;

    if value.trim().is_empty() {
        return Err(AppError::Validation(format!(
            "Invalid Promotion: {} must not be empty",
            key
        )));
    }
    if value.chars().count() > max_len {
        return Err(AppError::Validation(format!(
            "Invalid Promotion: {} exceeds {} characters",
            key, max_len
        )));
    }

    Ok(value)
}

fn read_integer(value: &Value, key: &str) -> Result<i64> {
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };

    parsed.ok_or_else(|| {
        AppError::Validation(format!(
            "Invalid Promotion: could not convert data - {} is not an integer",
            key
        ))
    })
}

fn read_amount(map: &Map<String, Value>) -> Result<f64> {
    let amount = match map.get("promotion_amount") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|a| a.is_finite())
    .ok_or_else(|| {
        AppError::Validation(
            "Invalid Promotion: could not convert data - promotion_amount is not a number"
                .to_string(),
        )
    })?;

    if amount < 0.0 {
        return Err(AppError::Validation(
            "Invalid Promotion: promotion_amount must not be negative".to_string(),
        ));
    }

    Ok(amount)
}

fn read_timestamp(map: &Map<String, Value>, key: &str) -> Result<NaiveDateTime> {
    let raw = read_string(map, key)?;

    parse_timestamp(&raw).ok_or_else(|| {
        AppError::Validation(format!(
            "Invalid Promotion: could not convert data - {} is not an ISO-8601 timestamp: {}",
            key, raw
        ))
    })
}

/// Parses an ISO-8601 timestamp into naive UTC.
///
/// Offsets are normalised to UTC; a bare date means midnight. Fractional
/// seconds are truncated to microseconds, the precision of a Postgres
/// `TIMESTAMP`.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    parse_naive(raw.trim()).map(|dt| dt.trunc_subsecs(6))
}

fn parse_naive(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt);
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_body() -> Value {
        json!({
            "name": "Spring Sale",
            "promotion_id": "PROMO-0001",
            "start_date": "2025-04-23T00:00:00",
            "end_date": "2025-04-30T00:00:00",
            "promotion_type": "DISCOUNT",
            "promotion_amount": 10.0,
            "promotion_description": "Seasonal discount"
        })
    }

    fn validation_message(result: Result<Promotion>) -> String {
        match result {
            Err(AppError::Validation(msg)) => msg,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_deserialize_valid_body() {
        let promotion = Promotion::default().deserialize(&sample_body()).unwrap();

        assert_eq!(promotion.id, None);
        assert_eq!(promotion.name, "Spring Sale");
        assert_eq!(promotion.promotion_id, "PROMO-0001");
        assert_eq!(promotion.start_date, parse_timestamp("2025-04-23").unwrap());
        assert_eq!(promotion.promotion_type, PromotionType::Discount);
        assert_eq!(promotion.promotion_amount, 10.0);
        assert_eq!(promotion.usage_count, 0);
        assert_eq!(promotion.state, PromotionState::Active);
    }

    #[test]
    fn test_serialize_wire_format() {
        let mut promotion = Promotion::default().deserialize(&sample_body()).unwrap();
        promotion.id = Some(7);

        let value = promotion.serialize();
        assert_eq!(value["id"], 7);
        assert_eq!(value["start_date"], "2025-04-23T00:00:00");
        assert_eq!(value["end_date"], "2025-04-30T00:00:00");
        assert_eq!(value["promotion_type"], "DISCOUNT");
        assert_eq!(value["usage_count"], 0);
        assert_eq!(value["state"], "active");
    }

    #[test]
    fn test_round_trip_preserves_fields() {
        let mut original = Promotion::default().deserialize(&sample_body()).unwrap();
        original.id = Some(3);
        original.usage_count = 4;
        original.state = PromotionState::Canceled;
        original.promotion_type = PromotionType::Flash;
        original.start_date = parse_timestamp("2025-04-23T10:15:30.250").unwrap();

        let copy = Promotion::default()
            .deserialize(&original.serialize())
            .unwrap();

        assert_eq!(copy.id, None);
        assert_eq!(Promotion { id: Some(3), ..copy }, original);
    }

    #[test]
    fn test_missing_key_is_named() {
        for key in REQUIRED_FIELDS {
            let mut body = sample_body();
            body.as_object_mut().unwrap().remove(key);

            let msg = validation_message(Promotion::default().deserialize(&body));
            assert!(msg.contains(key), "message {:?} should name {}", msg, key);
        }
    }

    #[test]
    fn test_non_object_body_rejected() {
        let msg = validation_message(Promotion::default().deserialize(&json!("not a promotion")));
        assert!(msg.contains("bad or no data"));
        assert!(Promotion::default().deserialize(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_bad_dates_rejected() {
        let mut body = sample_body();
        body["start_date"] = json!("April 23rd");
        let msg = validation_message(Promotion::default().deserialize(&body));
        assert!(msg.contains("start_date"));

        let mut body = sample_body();
        body["end_date"] = json!(20250430);
        assert!(Promotion::default().deserialize(&body).is_err());
    }

    #[test]
    fn test_end_before_start_is_allowed() {
        let mut body = sample_body();
        body["end_date"] = json!("2025-04-01T00:00:00");
        assert!(Promotion::default().deserialize(&body).is_ok());
    }

    #[test]
    fn test_amount_conversion() {
        let mut body = sample_body();
        body["promotion_amount"] = json!("12.5");
        let promotion = Promotion::default().deserialize(&body).unwrap();
        assert_eq!(promotion.promotion_amount, 12.5);

        body["promotion_amount"] = json!("ten");
        let msg = validation_message(Promotion::default().deserialize(&body));
        assert!(msg.contains("promotion_amount"));

        body["promotion_amount"] = json!(-1);
        assert!(Promotion::default().deserialize(&body).is_err());
    }

    #[test]
    fn test_promotion_type_validation() {
        let mut body = sample_body();
        body["promotion_type"] = json!("coupon");
        let promotion = Promotion::default().deserialize(&body).unwrap();
        assert_eq!(promotion.promotion_type, PromotionType::Coupon);

        body["promotion_type"] = json!("GIVEAWAY");
        let msg = validation_message(Promotion::default().deserialize(&body));
        assert!(msg.contains("promotion_type"));
    }

    #[test]
    fn test_client_id_must_be_integer_but_is_ignored() {
        let mut body = sample_body();
        body["id"] = json!("42");
        let promotion = Promotion::default().deserialize(&body).unwrap();
        assert_eq!(promotion.id, None);

        body["id"] = json!("abc");
        assert!(Promotion::default().deserialize(&body).is_err());
    }

    #[test]
    fn test_length_bounds() {
        let mut body = sample_body();
        body["name"] = json!("x".repeat(MAX_NAME_LEN + 1));
        assert!(Promotion::default().deserialize(&body).is_err());

        let mut body = sample_body();
        body["promotion_description"] = json!("d".repeat(MAX_DESCRIPTION_LEN + 1));
        assert!(Promotion::default().deserialize(&body).is_err());

        let mut body = sample_body();
        body["promotion_id"] = json!("  ");
        assert!(Promotion::default().deserialize(&body).is_err());
    }

    #[test]
    fn test_optional_fields_keep_existing_values() {
        let existing = Promotion {
            id: Some(1),
            usage_count: 9,
            state: PromotionState::Canceled,
            ..Promotion::default()
        };

        let updated = existing.deserialize(&sample_body()).unwrap();
        assert_eq!(updated.id, Some(1));
        assert_eq!(updated.usage_count, 9);
        assert_eq!(updated.state, PromotionState::Canceled);

        let mut body = sample_body();
        body["usage_count"] = json!(-3);
        assert!(Promotion::default().deserialize(&body).is_err());

        body["usage_count"] = json!(2);
        body["state"] = json!("dormant");
        assert!(Promotion::default().deserialize(&body).is_err());
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let midnight = NaiveDate::from_ymd_opt(2025, 4, 23)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();

        assert_eq!(parse_timestamp("2025-04-23"), Some(midnight));
        assert_eq!(parse_timestamp("2025-04-23T00:00:00"), Some(midnight));
        assert_eq!(parse_timestamp("2025-04-23 00:00:00"), Some(midnight));
        assert_eq!(parse_timestamp("2025-04-23T02:00:00+02:00"), Some(midnight));
        assert_eq!(parse_timestamp("2025-04-23T00:00"), Some(midnight));
        assert_eq!(parse_timestamp("Wed, 23 Apr 2025 00:00:00 GMT"), None);
    }

    #[test]
    fn test_parse_timestamp_truncates_to_microseconds() {
        let expected = NaiveDate::from_ymd_opt(2025, 4, 23)
            .unwrap()
            .and_hms_micro_opt(10, 15, 30, 123_456)
            .unwrap();

        assert_eq!(parse_timestamp("2025-04-23T10:15:30.123456789"), Some(expected));
        assert_eq!(parse_timestamp("2025-04-23T10:15:30.123456789Z"), Some(expected));
        assert_eq!(parse_timestamp("2025-04-23T10:15:30.123456"), Some(expected));

        let promotion = Promotion::default()
            .deserialize(&{
                let mut body = sample_body();
                body["start_date"] = json!("2025-04-23T10:15:30.123456789");
                body
            })
            .unwrap();
        assert_eq!(
            promotion.serialize()["start_date"],
            "2025-04-23T10:15:30.123456"
        );
    }

    #[test]
    fn test_is_expired() {
        let promotion = Promotion::default().deserialize(&sample_body()).unwrap();
        assert!(promotion.is_expired(parse_timestamp("2025-05-01").unwrap()));
        assert!(!promotion.is_expired(parse_timestamp("2025-04-29").unwrap()));
    }
}
