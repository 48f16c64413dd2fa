//! The immutable record produced for every executed operation.

use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Serialize};

/// Open field map attached to an outcome. Each category chooses its own keys.
pub type Payload = BTreeMap<String, serde_json::Value>;

const UNKNOWN_ERROR: &str = "unknown error";

/// Payload keys that carry a resource cost, checked in order.
const COST_KEYS: [&str; 3] = ["gasUsed", "gas_used", "resourceCost"];

/// Result of a single operation.
///
/// A failed outcome always carries a non-empty error message and a successful
/// one never does. Fields are only reachable through [`Outcome::success`] and
/// [`Outcome::failure`]; deserialization re-checks the same rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawOutcome", rename_all = "camelCase")]
pub struct Outcome {
    test_name: String,
    category: String,
    success: bool,
    duration_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resource_cost: Option<f64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    payload: Payload,
}

impl Outcome {
    pub fn success(
        test_name: impl Into<String>,
        category: impl Into<String>,
        duration: Duration,
        resource_cost: Option<f64>,
        payload: Payload,
    ) -> Self {
        Self {
            test_name: test_name.into(),
            category: category.into(),
            success: true,
            duration_ms: duration_ms(duration),
            error: None,
            resource_cost: resource_cost.filter(|c| c.is_finite()),
            payload,
        }
    }

    /// A failed outcome. An empty message is replaced with `"unknown error"`.
    pub fn failure(
        test_name: impl Into<String>,
        category: impl Into<String>,
        duration: Duration,
        error: impl Into<String>,
    ) -> Self {
        let error = error.into();
        let error = if is_blank(&error) { UNKNOWN_ERROR.to_string() } else { error };
        Self {
            test_name: test_name.into(),
            category: category.into(),
            success: false,
            duration_ms: duration_ms(duration),
            error: Some(error),
            resource_cost: None,
            payload: Payload::new(),
        }
    }

    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub const fn is_success(&self) -> bool {
        self.success
    }

    pub const fn duration_ms(&self) -> f64 {
        self.duration_ms
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub const fn resource_cost(&self) -> Option<f64> {
        self.resource_cost
    }

    pub const fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Numeric value of a payload field, falling back to the built-in
    /// `durationMs` and `resourceCost` columns.
    pub fn numeric_field(&self, field: &str) -> Option<f64> {
        if let Some(value) = self.payload.get(field) {
            return value_as_f64(value);
        }
        match field {
            "durationMs" => Some(self.duration_ms),
            "resourceCost" => self.resource_cost,
            _ => None,
        }
    }
}

fn is_blank(error: &str) -> bool {
    error.trim().is_empty()
}

fn duration_ms(duration: Duration) -> f64 {
    duration.as_nanos() as f64 / 1_000_000.0
}

/// Reads a JSON number or a numeric string as `f64`.
pub fn value_as_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOutcome {
    test_name: String,
    category: String,
    success: bool,
    duration_ms: f64,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    resource_cost: Option<f64>,
    #[serde(default)]
    payload: Payload,
}

impl TryFrom<RawOutcome> for Outcome {
    type Error = String;

    fn try_from(raw: RawOutcome) -> Result<Self, Self::Error> {
        if !raw.duration_ms.is_finite() || raw.duration_ms < 0.0 {
            return Err(format!("outcome '{}' has invalid duration {}", raw.test_name, raw.duration_ms));
        }
        let has_error = raw.error.as_deref().is_some_and(|e| !is_blank(e));
        if raw.success == has_error {
            return Err(format!(
                "outcome '{}' has success={} but error={:?}",
                raw.test_name, raw.success, raw.error
            ));
        }
        Ok(Self {
            test_name: raw.test_name,
            category: raw.category,
            success: raw.success,
            duration_ms: raw.duration_ms,
            error: raw.error.filter(|_| !raw.success),
            resource_cost: raw.resource_cost.filter(|c| c.is_finite()),
            payload: raw.payload,
        })
    }
}

/// Value returned by an operation under test.
pub trait OperationOutput {
    /// Resource cost reported by the backend, if any.
    fn resource_cost(&self) -> Option<f64> {
        None
    }

    /// Fields to attach to the outcome payload.
    fn into_payload(self) -> Payload;
}

impl OperationOutput for () {
    fn into_payload(self) -> Payload {
        Payload::new()
    }
}

impl OperationOutput for Payload {
    fn resource_cost(&self) -> Option<f64> {
        cost_field(self)
    }

    fn into_payload(self) -> Payload {
        self
    }
}

impl OperationOutput for serde_json::Value {
    fn resource_cost(&self) -> Option<f64> {
        self.as_object().and_then(|obj| {
            COST_KEYS.iter().find_map(|key| obj.get(*key).and_then(value_as_f64))
        })
    }

    fn into_payload(self) -> Payload {
        match self {
            serde_json::Value::Object(obj) => obj.into_iter().collect(),
            serde_json::Value::Null => Payload::new(),
            other => Payload::from([("value".to_string(), other)]),
        }
    }
}

fn cost_field(payload: &Payload) -> Option<f64> {
    COST_KEYS.iter().find_map(|key| payload.get(*key).and_then(value_as_f64))
}

/// Output builder used by test bodies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestOutput {
    cost: Option<f64>,
    payload: Payload,
}

impl TestOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn extend(mut self, payload: Payload) -> Self {
        self.payload.extend(payload);
        self
    }
}

impl OperationOutput for TestOutput {
    fn resource_cost(&self) -> Option<f64> {
        self.cost.or_else(|| cost_field(&self.payload))
    }

    fn into_payload(self) -> Payload {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_failure_keeps_error_invariant() {
        let outcome = Outcome::failure("t", "c", Duration::from_millis(3), "");
        assert!(!outcome.is_success());
        assert_eq!(outcome.error(), Some("unknown error"));
        assert!(outcome.duration_ms() >= 0.0);

        let outcome = Outcome::success("t", "c", Duration::ZERO, None, Payload::new());
        assert!(outcome.is_success());
        assert!(outcome.error().is_none());
    }

    #[test]
    fn test_success_drops_non_finite_cost() {
        let outcome = Outcome::success("t", "c", Duration::ZERO, Some(f64::NAN), Payload::new());
        assert_eq!(outcome.resource_cost(), None);
    }

    #[test]
    fn test_deserialize_rejects_inconsistent_outcome() {
        let bad = json!({
            "testName": "t", "category": "c", "success": false, "durationMs": 1.0
        });
        assert!(serde_json::from_value::<Outcome>(bad).is_err());

        let bad = json!({
            "testName": "t", "category": "c", "success": true, "durationMs": -1.0
        });
        assert!(serde_json::from_value::<Outcome>(bad).is_err());

        let good = json!({
            "testName": "t", "category": "c", "success": false, "durationMs": 1.5,
            "error": "reverted"
        });
        let outcome: Outcome = serde_json::from_value(good).unwrap();
        assert_eq!(outcome.error(), Some("reverted"));
    }

    #[test]
    fn test_blank_error_is_treated_as_missing() {
        let outcome = Outcome::failure("t", "c", Duration::ZERO, " \t\n");
        assert_eq!(outcome.error(), Some("unknown error"));

        let blank = json!({
            "testName": "t", "category": "c", "success": false, "durationMs": 1.0,
            "error": "   "
        });
        assert!(serde_json::from_value::<Outcome>(blank).is_err());

        let stale = json!({
            "testName": "t", "category": "c", "success": true, "durationMs": 1.0,
            "error": " "
        });
        let outcome: Outcome = serde_json::from_value(stale).unwrap();
        assert!(outcome.error().is_none());
    }

    #[test]
    fn test_json_output_cost_lookup() {
        let value = json!({ "gasUsed": "52000", "status": 1 });
        assert_eq!(value.resource_cost(), Some(52_000.0));
        let payload = value.into_payload();
        assert_eq!(payload.len(), 2);

        assert_eq!(json!(7).into_payload().get("value"), Some(&json!(7)));
        assert!(json!(null).into_payload().is_empty());
    }

    #[test]
    fn test_numeric_field_falls_back_to_builtins() {
        let payload = Payload::from([("rate".to_string(), json!(20))]);
        let outcome = Outcome::success("t", "c", Duration::from_millis(12), Some(9.0), payload);
        assert_eq!(outcome.numeric_field("rate"), Some(20.0));
        assert_eq!(outcome.numeric_field("durationMs"), Some(12.0));
        assert_eq!(outcome.numeric_field("resourceCost"), Some(9.0));
        assert_eq!(outcome.numeric_field("missing"), None);
    }

    #[test]
    fn test_output_builder_prefers_explicit_cost() {
        let output = TestOutput::new().field("gasUsed", 10).cost(42.0);
        assert_eq!(output.resource_cost(), Some(42.0));
        let output = TestOutput::new().field("gasUsed", 10);
        assert_eq!(output.resource_cost(), Some(10.0));
    }
}
