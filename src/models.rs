// Data models for the task store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Ordered list of parameter specifications.
///
/// The elements are opaque JSON documents owned by whatever validates job
/// parameters; the store only persists and returns them verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(pub Vec<Value>);

impl Parameters {
    pub fn new(specs: Vec<Value>) -> Self {
        Self(specs)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }

    /// Encode to the JSON text stored in the database
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.0)
    }

    /// Decode from stored JSON text. `null` decodes to an empty list.
    pub fn decode(json: &str) -> serde_json::Result<Self> {
        let specs: Option<Vec<Value>> = serde_json::from_str(json)?;
        Ok(Self(specs.unwrap_or_default()))
    }
}

impl From<Vec<Value>> for Parameters {
    fn from(specs: Vec<Value>) -> Self {
        Self(specs)
    }
}

/// Caller-supplied fields of a task, used for insert, update and import/export
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_parameters: Parameters,
    #[serde(default)]
    pub input_parameters_keyed: Parameters,
    #[serde(default)]
    pub output_parameters: Parameters,
}

impl NewTask {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_input_parameters(mut self, params: impl Into<Parameters>) -> Self {
        self.input_parameters = params.into();
        self
    }

    pub fn with_input_parameters_keyed(mut self, params: impl Into<Parameters>) -> Self {
        self.input_parameters_keyed = params.into();
        self
    }

    pub fn with_output_parameters(mut self, params: impl Into<Parameters>) -> Self {
        self.output_parameters = params.into();
        self
    }
}

/// A stored task definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Insertion-order id, only used as a list cursor
    pub sequential_id: i64,
    pub external_id: Uuid,
    pub key: String,
    pub name: String,
    pub description: String,
    pub input_parameters: Parameters,
    pub input_parameters_keyed: Parameters,
    pub output_parameters: Parameters,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// The caller-editable part of this task, without ids and timestamps
    pub fn to_new_task(&self) -> NewTask {
        NewTask {
            key: self.key.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            input_parameters: self.input_parameters.clone(),
            input_parameters_keyed: self.input_parameters_keyed.clone(),
            output_parameters: self.output_parameters.clone(),
        }
    }
}

/// Current time as microseconds since the Unix epoch
pub fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_now_micros() {
        let ts = now_micros();
        // Should be reasonable timestamp (after year 2020)
        assert!(ts > 1_600_000_000_000_000);
    }

    #[test]
    fn test_parameters_decode_null_is_empty() {
        let params = Parameters::decode("null").unwrap();
        assert!(params.is_empty());

        let params = Parameters::decode("[]").unwrap();
        assert!(params.is_empty());
    }

    #[test]
    fn test_parameters_decode_rejects_non_list() {
        assert!(Parameters::decode("{\"key\":\"x\"}").is_err());
        assert!(Parameters::decode("not json").is_err());
    }

    #[test]
    fn test_parameters_keep_order() {
        let params = Parameters::new(vec![
            json!({"key": "input", "type": "string", "requirement": "min1"}),
            json!({"key": "count", "type": "int", "requirement": "min1"}),
        ]);

        let encoded = params.encode().unwrap();
        let decoded = Parameters::decode(&encoded).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded.as_slice()[0]["key"], "input");
        assert_eq!(decoded.as_slice()[1]["key"], "count");
    }

    #[test]
    fn test_new_task_import_defaults() {
        let task: NewTask = serde_json::from_str(r#"{"key":"send_mail"}"#).unwrap();
        assert_eq!(task.key, "send_mail");
        assert_eq!(task.name, "");
        assert_eq!(task.description, "");
        assert!(task.input_parameters.is_empty());
        assert!(task.input_parameters_keyed.is_empty());
        assert!(task.output_parameters.is_empty());
    }

    #[test]
    fn test_new_task_serializes_parameters_as_arrays() {
        let task = NewTask::new("t1", "T1").with_output_parameters(vec![json!({"key": "result"})]);
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["input_parameters"], json!([]));
        assert_eq!(value["output_parameters"], json!([{"key": "result"}]));
    }
}
