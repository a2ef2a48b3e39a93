//! Typed value <-> 4-byte little-endian register encoding.

use log::trace;
use std::fmt;

use super::{DataType, Register};
use crate::error::RegisterError;

/// A register value before encoding / after decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    /// Only meaningful for registers with a float scale.
    Float(f64),
    /// Enum variant or single bitset flag, by name.
    Enum(String),
    /// Set of bitset flags. Bits without a name in the catalog appear as
    /// one hex entry such as `0x00800000`.
    Flags(Vec<String>),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Enum(s) => Some(s),
            _ => None,
        }
    }

    /// True if the flag is set (bitsets only).
    pub fn has_flag(&self, flag: &str) -> bool {
        match self {
            Value::Flags(flags) => flags.iter().any(|f| f == flag),
            Value::Enum(s) => s == flag,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Enum(s) => f.write_str(s),
            Value::Flags(flags) => write!(f, "[{}]", flags.join("|")),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Enum(s.to_string())
    }
}

fn encode_error(reg: &Register, value: &Value, reason: impl Into<String>) -> RegisterError {
    RegisterError::Encode {
        register: reg.name.clone(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn decode_error(reg: &Register, reason: impl Into<String>) -> RegisterError {
    RegisterError::Decode {
        register: reg.name.clone(),
        reason: reason.into(),
    }
}

/// Encode `value` for `reg` as 4 little-endian bytes.
pub fn encode(reg: &Register, value: &Value) -> Result<[u8; 4], RegisterError> {
    let raw: u32 = match reg.data_type {
        DataType::Bool => match value {
            Value::Bool(b) => u32::from(*b),
            Value::Int(0) => 0,
            Value::Int(1) => 1,
            _ => return Err(encode_error(reg, value, "expected a boolean")),
        },
        DataType::Enum => match value {
            Value::Enum(name) => reg
                .variant_code(name)
                .ok_or_else(|| encode_error(reg, value, "no such variant"))?,
            Value::Int(code) => {
                let code = u32::try_from(*code).map_err(|_| encode_error(reg, value, "negative code"))?;
                if reg.variant_name(code).is_none() {
                    return Err(encode_error(reg, value, "no variant with this code"));
                }
                code
            }
            _ => return Err(encode_error(reg, value, "expected a variant name")),
        },
        DataType::Bitset => match value {
            Value::Enum(name) => reg
                .flag_mask(name)
                .ok_or_else(|| encode_error(reg, value, "no such flag"))?,
            Value::Flags(names) => {
                let mut bits = 0u32;
                for name in names {
                    bits |= reg
                        .flag_mask(name)
                        .or_else(|| unnamed_bits(name))
                        .ok_or_else(|| encode_error(reg, value, format!("no such flag {}", name)))?;
                }
                bits
            }
            Value::Int(n) => u32::try_from(*n).map_err(|_| encode_error(reg, value, "out of u32 range"))?,
            _ => return Err(encode_error(reg, value, "expected flag names or a number")),
        },
        DataType::U32 | DataType::I32 => {
            let n = scaled(reg, value)?;
            if reg.data_type == DataType::U32 {
                u32::try_from(n).map_err(|_| encode_error(reg, value, "out of u32 range"))?
            } else {
                let v = i32::try_from(n).map_err(|_| encode_error(reg, value, "out of i32 range"))?;
                v as u32
            }
        }
    };
    Ok(raw.to_le_bytes())
}

/// Integer wire value before the signedness check.
fn scaled(reg: &Register, value: &Value) -> Result<i64, RegisterError> {
    match (reg.float_scale, value) {
        (_, Value::Int(i)) => match reg.float_scale {
            Some(scale) => round_checked(reg, value, *i as f64 * scale),
            None => Ok(*i),
        },
        (Some(scale), Value::Float(x)) => round_checked(reg, value, x * scale),
        (None, Value::Float(_)) => Err(encode_error(reg, value, "register takes integers")),
        _ => Err(encode_error(reg, value, "expected a number")),
    }
}

fn round_checked(reg: &Register, value: &Value, x: f64) -> Result<i64, RegisterError> {
    let r = x.round();
    if !r.is_finite() || r < i64::MIN as f64 || r > i64::MAX as f64 {
        return Err(encode_error(reg, value, "not representable"));
    }
    Ok(r as i64)
}

/// Decode 4 little-endian bytes read from `reg`.
pub fn decode(reg: &Register, bytes: [u8; 4]) -> Result<Value, RegisterError> {
    let raw = u32::from_le_bytes(bytes);
    let value = match reg.data_type {
        DataType::Bool => match raw {
            0 => Value::Bool(false),
            1 => Value::Bool(true),
            other => return Err(decode_error(reg, format!("{} is not a boolean", other))),
        },
        DataType::Enum => match reg.variant_name(raw) {
            Some(name) => Value::Enum(name.to_string()),
            None => return Err(decode_error(reg, format!("unknown code {}", raw))),
        },
        DataType::Bitset => {
            let mut named = 0u32;
            let mut flags: Vec<String> = reg
                .flags
                .iter()
                .filter(|(_, m)| raw & m == *m)
                .map(|(n, m)| {
                    named |= m;
                    n.clone()
                })
                .collect();
            let rest = raw & !named;
            if rest != 0 {
                trace!("{}: bits 0x{:08X} have no name", reg.name, rest);
                flags.push(format!("0x{:08X}", rest));
            }
            Value::Flags(flags)
        }
        DataType::U32 => scale_back(reg, i64::from(raw)),
        DataType::I32 => scale_back(reg, i64::from(raw as i32)),
    };
    Ok(value)
}

/// Raw bits written as a hex flag entry.
fn unnamed_bits(name: &str) -> Option<u32> {
    let hex = name.strip_prefix("0x")?;
    u32::from_str_radix(hex, 16).ok()
}

fn scale_back(reg: &Register, n: i64) -> Value {
    match reg.float_scale {
        Some(scale) => Value::Float(n as f64 / scale),
        None => Value::Int(n),
    }
}
