//! Module: key
//! Responsibility: canonical group-key derivation from grouping-column tuples.
//! Does not own: group enumeration or null validation reporting per column.
//! Boundary: every GroupKey in the crate is produced here.


use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error as ThisError;

///
/// CONSTANTS
///

/// Key of the single implicit group used when no grouping columns exist.
/// Every non-empty tuple encodes to a string starting with a type tag, so this
/// key cannot collide with a real tuple.
pub const SINGLE_GROUP_KEY: &str = "~";

const ELEMENT_DELIMITER: char = '|';
const HEX: &[u8; 16] = b"0123456789abcdef";

///
/// KeyError
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum KeyError {
    #[error("grouping value at position {position} is null")]
    NullValue { position: usize },
}

///
/// GroupKey
///
/// Canonical, order-stable identifier of one group.
///
/// Encoding is one tagged element per grouping value joined by `|`:
/// `b:<0|1>`, `i:<n>`, `u:<n>`, `f:<canonical bits hex>`, `t<len>:<text>`,
/// `x<len>:<hex>`. Text and blob payloads are length-prefixed, so delimiter
/// bytes inside an element never alias an element boundary.
///

#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct GroupKey(String);

impl GroupKey {
    /// Derive the canonical key for one ordered grouping tuple.
    pub fn from_values(values: &[Value]) -> Result<Self, KeyError> {
        if values.is_empty() {
            return Ok(Self::single());
        }

        let mut encoded = String::new();
        for (position, value) in values.iter().enumerate() {
            if position > 0 {
                encoded.push(ELEMENT_DELIMITER);
            }
            encode_element(&mut encoded, value).ok_or(KeyError::NullValue { position })?;
        }

        Ok(Self(encoded))
    }

    /// Key of the degenerate single-group partition.
    #[must_use]
    pub fn single() -> Self {
        Self(SINGLE_GROUP_KEY.to_string())
    }

    #[must_use]
    pub fn is_single(&self) -> bool {
        self.0 == SINGLE_GROUP_KEY
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for GroupKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Append one tagged element; `None` signals a null value.
fn encode_element(out: &mut String, value: &Value) -> Option<()> {
    match value {
        Value::Blob(bytes) => {
            out.push('x');
            out.push_str(&bytes.len().to_string());
            out.push(':');
            for byte in bytes {
                out.push(char::from(HEX[usize::from(byte >> 4)]));
                out.push(char::from(HEX[usize::from(byte & 0x0f)]));
            }
        }
        Value::Bool(v) => out.push_str(if *v { "b:1" } else { "b:0" }),
        Value::Float64(v) => {
            out.push_str("f:");
            out.push_str(&format!("{:016x}", canonical_float_bits(*v)));
        }
        Value::Int(v) => {
            out.push_str("i:");
            out.push_str(&v.to_string());
        }
        Value::Null => return None,
        Value::Text(text) => {
            out.push('t');
            out.push_str(&text.len().to_string());
            out.push(':');
            out.push_str(text);
        }
        Value::Uint(v) => {
            out.push_str("u:");
            out.push_str(&v.to_string());
        }
    }

    Some(())
}

// -0.0 folds into 0.0 and every NaN payload folds into one NaN.
fn canonical_float_bits(value: f64) -> u64 {
    if value.is_nan() {
        f64::NAN.to_bits()
    } else if value.to_bits() == (-0.0_f64).to_bits() {
        0.0_f64.to_bits()
    } else {
        value.to_bits()
    }
}
