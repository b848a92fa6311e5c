//! Signal values carried on the wire.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ApplyError;

/// A value read from or written to a simulation object.
///
/// # Examples
///
/// ```
/// use hdl_bridge::SignalValue;
///
/// let v = SignalValue::bits("10xz");
/// assert!(v.has_unknowns());
/// assert_eq!(SignalValue::Int(5).as_u64(), Some(5));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SignalValue {
    /// Two-state integer value.
    Int(u64),
    /// Four-state binary string, most significant bit first.
    Bits(String),
}

impl SignalValue {
    /// Creates a four-state value from a binary string.
    pub fn bits(digits: impl Into<String>) -> Self {
        Self::Bits(digits.into())
    }

    /// Returns the integer value if it has no unknown bits.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Bits(digits) => {
                if digits.is_empty() || digits.len() > 64 {
                    return None;
                }
                u64::from_str_radix(digits, 2).ok()
            }
        }
    }

    /// Returns true if any bit is `x` or `z`.
    #[must_use]
    pub fn has_unknowns(&self) -> bool {
        match self {
            Self::Int(_) => false,
            Self::Bits(digits) => digits.chars().any(|c| matches!(c, 'x' | 'X' | 'z' | 'Z')),
        }
    }

    /// Checks that the value is well formed for writing to `path`.
    ///
    /// # Errors
    /// Returns `ApplyError::InvalidValue` for empty bit strings or digits
    /// outside `01xzXZ`.
    pub fn validate(&self, path: &str) -> Result<(), ApplyError> {
        let Self::Bits(digits) = self else {
            return Ok(());
        };
        if digits.is_empty() {
            return Err(ApplyError::InvalidValue {
                path: path.to_string(),
                reason: "empty bit string".to_string(),
            });
        }
        if let Some(bad) = digits.chars().find(|c| !matches!(c, '0' | '1' | 'x' | 'X' | 'z' | 'Z')) {
            return Err(ApplyError::InvalidValue {
                path: path.to_string(),
                reason: format!("invalid digit '{bad}' in bit string"),
            });
        }
        Ok(())
    }

    /// Renders the value as a binary string of at least `width` digits.
    #[must_use]
    pub fn to_bits(&self, width: usize) -> String {
        match self {
            Self::Int(v) => format!("{v:0width$b}"),
            Self::Bits(digits) => {
                if digits.len() >= width {
                    digits.to_ascii_lowercase()
                } else {
                    format!("{}{}", "0".repeat(width - digits.len()), digits.to_ascii_lowercase())
                }
            }
        }
    }
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Bits(digits) => write!(f, "'b{digits}"),
        }
    }
}
