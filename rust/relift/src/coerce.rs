//! Reconcile a produced value's type with the type a parameter expects.

use crate::error::FaultKind;
use crate::ir::{Builder, CastOp, Value};
use crate::types::Type;

/// Convert `value` to `intended`.
///
/// Identical types pass through untouched. A pointer becomes another
/// pointer type by bitcast, or an integer by pointer-to-integer conversion.
/// Nothing else is convertible.
pub fn coerce(b: &mut Builder<'_>, value: Value, intended: &Type) -> Result<Value, FaultKind> {
    let from = b.value_type(value).clone();
    if &from == intended {
        return Ok(value);
    }
    if from.is_pointer() {
        if intended.is_pointer() {
            return Ok(b.cast(CastOp::BitCast, value, intended.clone()));
        }
        if intended.is_int() {
            return Ok(b.cast(CastOp::PtrToInt, value, intended.clone()));
        }
    }
    Err(FaultKind::NotConvertible {
        from,
        to: intended.clone(),
    })
}
