use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Structured attributes attached to a reference vector
pub type Payload = serde_json::Map<String, Value>;

/// Payload field carrying the stable row identifier
pub const ROW_ID_FIELD: &str = "row_id";

/// Identifier a backend assigns to a stored point
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NativeId {
    Int(u64),
    Str(String),
}

impl fmt::Display for NativeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeId::Int(v) => write!(f, "{}", v),
            NativeId::Str(s) => f.write_str(s),
        }
    }
}

impl From<u64> for NativeId {
    fn from(v: u64) -> Self {
        NativeId::Int(v)
    }
}

impl From<String> for NativeId {
    fn from(v: String) -> Self {
        NativeId::Str(v)
    }
}

/// One entry of a backend's answer to a search request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: NativeId,
    #[serde(default)]
    pub payload: Payload,
    pub score: f32,
}

/// Backend-ordered hits for one query at one k
pub type SearchResult = Vec<SearchHit>;

/// A ground-truth annotation: every listed field must match the payload.
///
/// Strings compare case-insensitively, numbers by value. When the payload
/// field holds an array, any element may satisfy the expectation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Expectation(pub serde_json::Map<String, Value>);

impl Expectation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, payload: &Payload) -> bool {
        if self.0.is_empty() {
            return false;
        }
        self.0.iter().all(|(field, want)| match payload.get(field) {
            Some(Value::Array(items)) => items.iter().any(|got| values_match(got, want)),
            Some(got) => values_match(got, want),
            None => false,
        })
    }
}

fn values_match(got: &Value, want: &Value) -> bool {
    match (got, want) {
        (Value::String(a), Value::String(b)) => a.trim().to_lowercase() == b.trim().to_lowercase(),
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
        _ => got == want,
    }
}

/// A workload entry: query text plus its expected annotations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    #[serde(default)]
    pub expected: Vec<Expectation>,
}

impl Query {
    pub fn new(text: impl Into<String>, expected: Vec<Expectation>) -> Self {
        Self {
            text: text.into(),
            expected,
        }
    }
}
