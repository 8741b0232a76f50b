//! IR type lattice for lifted code.
//!
//! Scalars are fixed-width integers and IEEE floats. Pointers carry their
//! pointee so that loads know what they produce and so that the coercion
//! engine can tell one pointer type from another. The memory token and the
//! machine state are opaque.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeParseError;

/// A type in lifted IR.
///
/// The textual form (`i64`, `f32`, `i8*`, `mem`, `state*`) is what
/// architecture description files use for semantics signatures.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Type {
    /// Integer of the given bit width.
    Int(u32),
    /// Floating point value of the given bit width.
    Float(u32),
    /// Pointer to a value of the inner type.
    Ptr(Box<Type>),
    /// Opaque memory token threaded through semantics calls.
    Memory,
    /// Opaque machine state structure.
    State,
}

impl Type {
    pub fn int(bits: u32) -> Self {
        Type::Int(bits)
    }

    pub fn float(bits: u32) -> Self {
        Type::Float(bits)
    }

    pub fn ptr(pointee: Type) -> Self {
        Type::Ptr(Box::new(pointee))
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Type::Int(_))
    }

    /// `true` if this is an integer of exactly `bits` bits.
    pub fn is_int_of(&self, bits: u32) -> bool {
        matches!(self, Type::Int(b) if *b == bits)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::Float(_))
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Ptr(_))
    }

    /// Pointee of a pointer type.
    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Type::Ptr(inner) => Some(inner),
            _ => None,
        }
    }

    /// Width of a scalar type in bits. Pointers and opaque types have none.
    pub fn scalar_bits(&self) -> Option<u32> {
        match self {
            Type::Int(bits) | Type::Float(bits) => Some(*bits),
            _ => None,
        }
    }

    /// Storage size in bytes, with pointers and tokens occupying a machine word.
    pub fn byte_size(&self, word_bits: u32) -> u64 {
        let bits = match self {
            Type::Int(bits) | Type::Float(bits) => *bits,
            Type::Ptr(_) | Type::Memory => word_bits,
            Type::State => 0,
        };
        u64::from(bits.div_ceil(8))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int(bits) => write!(f, "i{bits}"),
            Type::Float(bits) => write!(f, "f{bits}"),
            Type::Ptr(inner) => write!(f, "{inner}*"),
            Type::Memory => write!(f, "mem"),
            Type::State => write!(f, "state"),
        }
    }
}

impl FromStr for Type {
    type Err = TypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(inner) = s.strip_suffix('*') {
            return Ok(Type::ptr(inner.parse()?));
        }
        match s {
            "mem" => return Ok(Type::Memory),
            "state" => return Ok(Type::State),
            _ => {}
        }
        let (ctor, digits): (fn(u32) -> Type, &str) = if let Some(rest) = s.strip_prefix('i') {
            (Type::Int, rest)
        } else if let Some(rest) = s.strip_prefix('f') {
            (Type::Float, rest)
        } else {
            return Err(TypeParseError::Unknown(s.to_string()));
        };
        let bits: u32 = digits
            .parse()
            .map_err(|_| TypeParseError::Unknown(s.to_string()))?;
        match (ctor(bits), bits) {
            (_, 0) => Err(TypeParseError::ZeroWidth(s.to_string())),
            (Type::Int(_), b) if b > 128 => Err(TypeParseError::TooWide(s.to_string())),
            (Type::Float(_), b) if !matches!(b, 16 | 32 | 64 | 80 | 128) => {
                Err(TypeParseError::BadFloatWidth(s.to_string()))
            }
            (ty, _) => Ok(ty),
        }
    }
}

impl TryFrom<String> for Type {
    type Error = TypeParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Type> for String {
    fn from(ty: Type) -> Self {
        ty.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_round_trip_for_signature_strings() {
        for s in ["i8", "i64", "i128", "f32", "f80", "i32*", "f64**", "mem", "state*"] {
            let ty: Type = s.parse().expect("valid type");
            assert_eq!(ty.to_string(), s);
        }
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!("x32".parse::<Type>(), Err(TypeParseError::Unknown(_))));
        assert!(matches!("i0".parse::<Type>(), Err(TypeParseError::ZeroWidth(_))));
        assert!(matches!("i256".parse::<Type>(), Err(TypeParseError::TooWide(_))));
        assert!(matches!("f24".parse::<Type>(), Err(TypeParseError::BadFloatWidth(_))));
    }

    #[test]
    fn byte_sizes() {
        assert_eq!(Type::Int(8).byte_size(64), 1);
        assert_eq!(Type::Int(1).byte_size(64), 1);
        assert_eq!(Type::Float(80).byte_size(64), 10);
        assert_eq!(Type::ptr(Type::Int(8)).byte_size(32), 4);
    }

    #[test]
    fn pointee_and_predicates() {
        let ty = Type::ptr(Type::Int(32));
        assert!(ty.is_pointer());
        assert_eq!(ty.pointee(), Some(&Type::Int(32)));
        assert!(Type::Int(64).is_int_of(64));
        assert!(!Type::Int(64).is_int_of(32));
        assert_eq!(Type::Memory.scalar_bits(), None);
    }
}
