// Typed port values and text coercion

use super::descriptor::PortType;
use serde::{Deserialize, Serialize};

/// A known port value. Booleans are stored as `Integer(0 | 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortValue {
    Integer(i64),
    Float(f64),
}

impl PortValue {
    /// Render for a command environment variable
    pub fn to_env_string(&self) -> String {
        self.to_string()
    }
}

impl From<bool> for PortValue {
    fn from(value: bool) -> Self {
        PortValue::Integer(i64::from(value))
    }
}

impl From<i64> for PortValue {
    fn from(value: i64) -> Self {
        PortValue::Integer(value)
    }
}

impl From<f64> for PortValue {
    fn from(value: f64) -> Self {
        PortValue::Float(value)
    }
}

impl std::fmt::Display for PortValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortValue::Integer(i) => write!(f, "{}", i),
            PortValue::Float(v) if v.is_nan() => write!(f, "nan"),
            PortValue::Float(v) if v.is_infinite() => {
                write!(f, "{}", if *v > 0.0 { "inf" } else { "-inf" })
            }
            PortValue::Float(v) => f.write_str(&format_float(*v)),
        }
    }
}

/// Shortest round-trip text of a finite float.
///
/// Debug keeps the fractional part (2.0 stays "2.0") and switches to
/// exponent form outside [1e-4, 1e16); the exponent is then written signed
/// with at least two digits ("1e+20", "1.5e-07").
fn format_float(v: f64) -> String {
    let text = format!("{:?}", v);
    let Some((mantissa, exponent)) = text.split_once('e') else {
        return text;
    };
    let (sign, digits) = match exponent.strip_prefix('-') {
        Some(digits) => ('-', digits),
        None => ('+', exponent),
    };
    format!("{}e{}{:0>2}", mantissa, sign, digits)
}

/// Outcome of coercing one piece of command output
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Coerced {
    Integer(i64),
    Float(f64),
    Unknown,
}

impl Coerced {
    pub fn into_value(self) -> Option<PortValue> {
        match self {
            Coerced::Integer(i) => Some(PortValue::Integer(i)),
            Coerced::Float(f) => Some(PortValue::Float(f)),
            Coerced::Unknown => None,
        }
    }
}

/// Coerce output text into a value for a port of the given type.
///
/// Order: integer, then float, then (boolean ports only) the literal
/// `"true"`. Text `"false"` is deliberately not recognized and stays
/// `Unknown`.
pub fn coerce(text: &str, port_type: PortType) -> Coerced {
    let text = text.trim().to_lowercase();

    if let Some(i) = parse_integer(&text) {
        return Coerced::Integer(i);
    }

    if let Some(f) = parse_float(&text) {
        return Coerced::Float(f);
    }

    if port_type == PortType::Boolean && text == "true" {
        return Coerced::Integer(1);
    }

    Coerced::Unknown
}

fn parse_integer(text: &str) -> Option<i64> {
    let digits = strip_digit_separators(text)?;
    digits.parse::<i64>().ok()
}

fn parse_float(text: &str) -> Option<f64> {
    let digits = strip_digit_separators(text)?;
    digits.parse::<f64>().ok()
}

/// Remove `_` separators, which are only valid between two digits
fn strip_digit_separators(text: &str) -> Option<String> {
    if !text.contains('_') {
        return Some(text.to_string());
    }

    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());

    for (i, c) in chars.iter().enumerate() {
        if *c == '_' {
            let prev_is_digit = i > 0 && chars[i - 1].is_ascii_digit();
            let next_is_digit = chars.get(i + 1).is_some_and(|n| n.is_ascii_digit());
            if !(prev_is_digit && next_is_digit) {
                return None;
            }
        } else {
            out.push(*c);
        }
    }

    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_before_float() {
        assert_eq!(coerce("42", PortType::Number), Coerced::Integer(42));
        assert_eq!(coerce(" -7 ", PortType::Number), Coerced::Integer(-7));
        assert_eq!(coerce("+3", PortType::Number), Coerced::Integer(3));
    }

    #[test]
    fn test_float_fallback() {
        assert_eq!(coerce("2.75", PortType::Number), Coerced::Float(2.75));
        assert_eq!(coerce("1E3", PortType::Number), Coerced::Float(1000.0));
        assert_eq!(coerce(".5", PortType::Number), Coerced::Float(0.5));
    }

    #[test]
    fn test_integer_overflow_becomes_float() {
        assert_eq!(
            coerce("99999999999999999999", PortType::Number),
            Coerced::Float(1e20)
        );
    }

    #[test]
    fn test_digit_separators() {
        assert_eq!(coerce("1_000", PortType::Number), Coerced::Integer(1000));
        assert_eq!(coerce("1_0.2_5", PortType::Number), Coerced::Float(10.25));
        assert_eq!(coerce("_1", PortType::Number), Coerced::Unknown);
        assert_eq!(coerce("1__0", PortType::Number), Coerced::Unknown);
        assert_eq!(coerce("1_", PortType::Number), Coerced::Unknown);
    }

    #[test]
    fn test_special_floats() {
        assert!(matches!(coerce("inf", PortType::Number), Coerced::Float(f) if f.is_infinite()));
        assert!(matches!(coerce("NaN", PortType::Number), Coerced::Float(f) if f.is_nan()));
    }

    #[test]
    fn test_non_numeric_text() {
        assert_eq!(coerce("abc", PortType::Number), Coerced::Unknown);
        assert_eq!(coerce("abc", PortType::Boolean), Coerced::Unknown);
        assert_eq!(coerce("", PortType::Number), Coerced::Unknown);
    }

    #[test]
    fn test_boolean_true_literal() {
        assert_eq!(coerce("true", PortType::Boolean), Coerced::Integer(1));
        assert_eq!(coerce(" TRUE\n", PortType::Boolean), Coerced::Integer(1));
        // Only for boolean ports
        assert_eq!(coerce("true", PortType::Number), Coerced::Unknown);
    }

    #[test]
    fn test_boolean_false_literal_not_recognized() {
        assert_eq!(coerce("false", PortType::Boolean), Coerced::Unknown);
        assert_eq!(coerce("on", PortType::Boolean), Coerced::Unknown);
        assert_eq!(coerce("0", PortType::Boolean), Coerced::Integer(0));
    }

    #[test]
    fn test_bool_normalized_to_integer() {
        assert_eq!(PortValue::from(true), PortValue::Integer(1));
        assert_eq!(PortValue::from(false), PortValue::Integer(0));
    }

    #[test]
    fn test_env_rendering() {
        assert_eq!(PortValue::Integer(1).to_env_string(), "1");
        assert_eq!(PortValue::Float(2.0).to_env_string(), "2.0");
        assert_eq!(PortValue::Float(0.1).to_env_string(), "0.1");
        assert_eq!(PortValue::Float(f64::NEG_INFINITY).to_env_string(), "-inf");
    }

    #[test]
    fn test_exponent_rendering() {
        assert_eq!(PortValue::Float(1e20).to_env_string(), "1e+20");
        assert_eq!(PortValue::Float(1e16).to_env_string(), "1e+16");
        assert_eq!(PortValue::Float(1.5e-7).to_env_string(), "1.5e-07");
        assert_eq!(PortValue::Float(-2.5e-100).to_env_string(), "-2.5e-100");
        assert_eq!(PortValue::Float(1e15).to_env_string(), "1000000000000000.0");
        assert_eq!(PortValue::Float(0.0001).to_env_string(), "0.0001");
    }
}
