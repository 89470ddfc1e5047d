use std::fmt;

use serde::Serialize;

use crate::{HttpError, Result};

/// Ordered key/value pairs rendered as a URL query string.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryString {
    pairs: Vec<(String, String)>,
}

/// Ordered key/value pairs sent as an `application/x-www-form-urlencoded` body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FormString {
    pairs: Vec<(String, String)>,
}

macro_rules! pair_collection {
    ($name:ident) => {
        impl $name {
            pub fn new() -> Self {
                Self::default()
            }

            /// Adds one pair; duplicate keys are kept in order.
            pub fn append(mut self, key: impl Into<String>, value: impl ToString) -> Self {
                self.pairs.push((key.into(), value.to_string()));
                self
            }

            /// Builds pairs from the fields of a struct or the entries of a map.
            ///
            /// Strings are used verbatim, `null` becomes an empty value and any
            /// other value is rendered as JSON text.
            pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self> {
                Ok(Self {
                    pairs: object_pairs(value)?,
                })
            }

            pub fn pairs(&self) -> &[(String, String)] {
                &self.pairs
            }

            pub fn is_empty(&self) -> bool {
                self.pairs.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&encode_pairs(&self.pairs))
            }
        }

        impl<K, V> FromIterator<(K, V)> for $name
        where
            K: Into<String>,
            V: ToString,
        {
            fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
                Self {
                    pairs: iter
                        .into_iter()
                        .map(|(key, value)| (key.into(), value.to_string()))
                        .collect(),
                }
            }
        }

        impl<K, V, const N: usize> From<[(K, V); N]> for $name
        where
            K: Into<String>,
            V: ToString,
        {
            fn from(pairs: [(K, V); N]) -> Self {
                pairs.into_iter().collect()
            }
        }
    };
}

pair_collection!(QueryString);
pair_collection!(FormString);

fn encode_pairs(pairs: &[(String, String)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

fn object_pairs<T: Serialize>(value: &T) -> Result<Vec<(String, String)>> {
    let value = serde_json::to_value(value).map_err(|err| {
        HttpError::InvalidRequest(format!("value cannot be turned into pairs: {err}"))
    })?;
    let serde_json::Value::Object(map) = value else {
        return Err(HttpError::InvalidRequest(
            "only structs and maps can be turned into pairs".to_owned(),
        ));
    };

    Ok(map
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(text) => text,
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            };
            (key, value)
        })
        .collect())
}
