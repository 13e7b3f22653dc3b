//! Integer and float arithmetic with transparent promotion to arbitrary precision.
//!
//! `Value::Int(i64)` is used whenever a result fits; checked operations that overflow are
//! redone on `BigInt` and the result is demoted again by [`Value::from_bigint`]. Division
//! and modulo follow floor semantics: the remainder takes the sign of the divisor.

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{ToPrimitive, Zero};

use crate::{
    exception::{ExcType, RunResult},
    value::{Number, Value},
};

/// Arithmetic operators with numeric fast paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NumOp {
    Add,
    Sub,
    Mul,
    /// Classic `/`: floor division for integers, true division once a float is involved.
    Div,
    TrueDiv,
    FloorDiv,
    Mod,
}

/// Applies `op` to two numbers.
pub(crate) fn arith(op: NumOp, a: &Number, b: &Number) -> RunResult<Value> {
    match (a, b) {
        (Number::Float(_), _) | (_, Number::Float(_)) => float_arith(op, a.to_f64(), b.to_f64()),
        (Number::Int(x), Number::Int(y)) => int_arith(op, *x, *y),
        _ => match (a.to_bigint(), b.to_bigint()) {
            (Some(x), Some(y)) => big_arith(op, &x, &y),
            _ => Err(crate::exception::RunError::internal("non-integral operand in integer arithmetic")),
        },
    }
}

fn int_arith(op: NumOp, x: i64, y: i64) -> RunResult<Value> {
    let overflow_prone = x == i64::MIN && y == -1;
    let result = match op {
        NumOp::Add => x.checked_add(y),
        NumOp::Sub => x.checked_sub(y),
        NumOp::Mul => x.checked_mul(y),
        NumOp::Div | NumOp::FloorDiv => {
            if y == 0 {
                return Err(ExcType::zero_division());
            }
            (!overflow_prone).then(|| Integer::div_floor(&x, &y))
        }
        NumOp::Mod => {
            if y == 0 {
                return Err(ExcType::zero_division());
            }
            if overflow_prone { Some(0) } else { Some(x.mod_floor(&y)) }
        }
        NumOp::TrueDiv => {
            if y == 0 {
                return Err(ExcType::ZeroDivisionError.error("division by zero"));
            }
            return Ok(Value::Float(x as f64 / y as f64));
        }
    };
    match result {
        Some(value) => Ok(Value::Int(value)),
        None => big_arith(op, &BigInt::from(x), &BigInt::from(y)),
    }
}

fn big_arith(op: NumOp, x: &BigInt, y: &BigInt) -> RunResult<Value> {
    let result = match op {
        NumOp::Add => x + y,
        NumOp::Sub => x - y,
        NumOp::Mul => x * y,
        NumOp::Div | NumOp::FloorDiv | NumOp::Mod if y.is_zero() => return Err(ExcType::zero_division()),
        NumOp::Div | NumOp::FloorDiv => x.div_floor(y),
        NumOp::Mod => x.mod_floor(y),
        NumOp::TrueDiv => {
            if y.is_zero() {
                return Err(ExcType::ZeroDivisionError.error("division by zero"));
            }
            let (Some(a), Some(b)) = (x.to_f64(), y.to_f64()) else {
                return Err(ExcType::OverflowError.error("long int too large to convert to float"));
            };
            return Ok(Value::Float(a / b));
        }
    };
    Ok(Value::from_bigint(result))
}

fn float_arith(op: NumOp, x: f64, y: f64) -> RunResult<Value> {
    let result = match op {
        NumOp::Add => x + y,
        NumOp::Sub => x - y,
        NumOp::Mul => x * y,
        NumOp::Div | NumOp::TrueDiv => {
            if y == 0.0 {
                return Err(ExcType::ZeroDivisionError.error("float division by zero"));
            }
            x / y
        }
        NumOp::FloorDiv => {
            if y == 0.0 {
                return Err(ExcType::ZeroDivisionError.error("float divmod()"));
            }
            (x / y).floor()
        }
        NumOp::Mod => {
            if y == 0.0 {
                return Err(ExcType::ZeroDivisionError.error("float modulo"));
            }
            let rem = x % y;
            if rem != 0.0 && (rem < 0.0) != (y < 0.0) { rem + y } else { rem }
        }
    };
    Ok(Value::Float(result))
}

/// Unary minus.
pub(crate) fn negate(n: &Number) -> Value {
    match n {
        Number::Int(i) => i
            .checked_neg()
            .map_or_else(|| Value::from_bigint(-BigInt::from(*i)), Value::Int),
        Number::Big(big) => Value::from_bigint(-(**big).clone()),
        Number::Float(f) => Value::Float(-f),
    }
}

/// Unary plus; booleans become integers.
pub(crate) fn positive(n: &Number) -> Value {
    match n {
        Number::Int(i) => Value::Int(*i),
        Number::Big(big) => Value::Long(big.clone()),
        Number::Float(f) => Value::Float(*f),
    }
}
