//! Call envelopes.
//!
//! An intercepted call travels as a JSON array whose first element is the
//! `Type|Method` key and whose remaining elements are the positional
//! arguments: `["Greeter|Greet", "Ada"]`.

use serde_json::Value;

use podcall_common::{MethodIdentity, RouterError};

/// A decoded call: which method, with which arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct CallEnvelope {
    /// The method being called.
    pub identity: MethodIdentity,
    /// Positional arguments, already serialized.
    pub args: Vec<Value>,
}

impl CallEnvelope {
    /// Create an envelope.
    pub fn new(identity: MethodIdentity, args: Vec<Value>) -> Self {
        Self { identity, args }
    }

    /// Decode an envelope from its JSON array form.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::InvalidEnvelope`] if the value is not a
    /// non-empty array headed by a valid `Type|Method` key.
    pub fn from_value(value: Value) -> Result<Self, RouterError> {
        let Value::Array(mut items) = value else {
            return Err(RouterError::invalid_envelope("expected a JSON array"));
        };
        if items.is_empty() {
            return Err(RouterError::invalid_envelope("missing method identity"));
        }

        let args = items.split_off(1);
        let Some(Value::String(key)) = items.pop() else {
            return Err(RouterError::invalid_envelope(
                "method identity must be a string",
            ));
        };
        let identity = MethodIdentity::parse(&key).ok_or_else(|| {
            RouterError::invalid_envelope(format!("malformed method identity: {key}"))
        })?;

        Ok(Self { identity, args })
    }

    /// Decode an envelope from raw JSON.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::InvalidEnvelope`] for malformed JSON or shape.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, RouterError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| RouterError::invalid_envelope(e.to_string()))?;
        Self::from_value(value)
    }

    /// Encode the envelope as its JSON array form.
    pub fn to_value(&self) -> Value {
        let mut items = Vec::with_capacity(self.args.len() + 1);
        items.push(Value::String(self.identity.key()));
        items.extend(self.args.iter().cloned());
        Value::Array(items)
    }
}
