//! Resource key extraction and validation.
//!
//! A key is whatever follows the leading `/` of the request path, trimmed, as
//! long as it reads as a number. It is kept verbatim: `/0x1A` and `/26` are
//! distinct keys and map to distinct cache files.

use std::fmt;

use thiserror::Error;

/// Reasons a request path does not name a resource.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("no resource key in request path")]
    Empty,

    #[error("resource key {0:?} is not numeric")]
    NotNumeric(String),
}

/// A validated resource key.
///
/// # Examples
///
/// ```
/// use catcache::key::validate;
///
/// let key = validate("/418").unwrap();
/// assert_eq!(key.as_str(), "418");
/// assert!(validate("/favicon.ico").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey(String);

impl ResourceKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ResourceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Extracts the resource key from a request path.
///
/// Strips one leading `/`, trims whitespace, and requires the rest to be a
/// complete numeric literal.
///
/// # Errors
///
/// [`KeyError::Empty`] when nothing is left after trimming,
/// [`KeyError::NotNumeric`] otherwise.
pub fn validate(raw_path: &str) -> Result<ResourceKey, KeyError> {
    let candidate = raw_path.strip_prefix('/').unwrap_or(raw_path).trim();

    if candidate.is_empty() {
        return Err(KeyError::Empty);
    }
    if !is_numeric_literal(candidate) {
        return Err(KeyError::NotNumeric(candidate.to_owned()));
    }

    Ok(ResourceKey(candidate.to_owned()))
}

// Accepts the numeric string grammar of ECMAScript `Number(...)`: signed
// decimals with optional fraction and exponent, `Infinity`, and unsigned
// 0x/0o/0b integers. No digit separators.
fn is_numeric_literal(s: &str) -> bool {
    let bytes = s.as_bytes();

    if let [b'0', radix, digits @ ..] = bytes {
        let radix = match radix {
            b'x' | b'X' => Some(16),
            b'o' | b'O' => Some(8),
            b'b' | b'B' => Some(2),
            _ => None,
        };
        if let Some(radix) = radix {
            return !digits.is_empty()
                && digits.iter().all(|&d| char::from(d).is_digit(radix));
        }
    }

    let unsigned = match bytes.first() {
        Some(b'+' | b'-') => &bytes[1..],
        _ => bytes,
    };
    if unsigned == b"Infinity" {
        return true;
    }

    let (mantissa, exponent) = match unsigned.iter().position(|&b| b == b'e' || b == b'E') {
        Some(pos) => (&unsigned[..pos], Some(&unsigned[pos + 1..])),
        None => (unsigned, None),
    };

    let (int_part, frac_part) = match mantissa.iter().position(|&b| b == b'.') {
        Some(pos) => (&mantissa[..pos], &mantissa[pos + 1..]),
        None => (mantissa, &[][..]),
    };
    let all_digits = |part: &[u8]| part.iter().all(u8::is_ascii_digit);
    if int_part.is_empty() && frac_part.is_empty() {
        return false;
    }
    if !all_digits(int_part) || !all_digits(frac_part) {
        return false;
    }

    match exponent {
        None => true,
        Some(exp) => {
            let exp = match exp.first() {
                Some(b'+' | b'-') => &exp[1..],
                _ => exp,
            };
            !exp.is_empty() && all_digits(exp)
        }
    }
}
