use serde::Serialize;

use crate::{FormString, HttpError, Result};

/// Media types understood by [`encode_body`].
pub mod content_types {
    pub const JSON: &str = "application/json";
    pub const XML: &str = "application/xml";
    pub const FORM: &str = "application/x-www-form-urlencoded";
}

/// Request payload before encoding.
#[derive(Clone, Debug, PartialEq)]
pub enum Body {
    /// Raw text. Sent as-is when it is valid JSON or the hint asks for a
    /// form; otherwise encoded as a JSON string literal.
    Text(String),
    /// Form pairs, always sent form-encoded.
    Form(FormString),
    /// A JSON document.
    Json(serde_json::Value),
}

impl Body {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn form(value: FormString) -> Self {
        Self::Form(value)
    }

    /// Serializes `value` into a JSON body.
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Self::Json)
            .map_err(|err| HttpError::InvalidRequest(format!("body is not serializable: {err}")))
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<FormString> for Body {
    fn from(value: FormString) -> Self {
        Self::Form(value)
    }
}

impl From<serde_json::Value> for Body {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

/// Encodes `body` and picks its media type.
///
/// `content_type_hint` only matters for [`Body::Text`]: with
/// [`content_types::FORM`] the text is sent verbatim as a form.
pub fn encode_body(body: &Body, content_type_hint: &str) -> (String, &'static str) {
    match body {
        Body::Text(text) if content_type_hint == content_types::FORM => {
            (text.clone(), content_types::FORM)
        }
        Body::Text(text) => {
            let payload = if serde_json::from_str::<serde_json::Value>(text).is_ok() {
                text.clone()
            } else {
                serde_json::Value::String(text.clone()).to_string()
            };
            (payload, content_types::JSON)
        }
        Body::Form(form) => (form.to_string(), content_types::FORM),
        Body::Json(value) => (value.to_string(), content_types::JSON),
    }
}
