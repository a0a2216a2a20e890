use serde::{Deserialize, Serialize};
use serde_json::Number;

/// The only method this service answers.
pub const METHOD: &str = "isPrime";

/// One client record. `number` keeps the literal exactly as it was sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<Number>,
}

impl Request {
    pub fn new(number: Number) -> Self {
        Self {
            method: METHOD.to_string(),
            number: Some(number),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub method: String,
    pub prime: bool,
}

impl Response {
    pub fn new(prime: bool) -> Self {
        Self {
            method: METHOD.to_string(),
            prime,
        }
    }
}
