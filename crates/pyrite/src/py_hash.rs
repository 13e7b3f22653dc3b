//! Hashing for dictionary keys and set members.
//!
//! Hashes are deterministic within a process. Numbers that compare equal hash equal across
//! `bool`, `int`, `long` and `float` (`hash(1) == hash(1.0) == hash(True)`), which is what
//! lets them share dictionary slots.

use std::sync::LazyLock;

use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive};

use crate::{
    exception::{ExcType, RunResult},
    value::Value,
};

/// Mersenne prime `2^61 - 1`; numeric hashes are reduced modulo this value.
const MODULUS: u64 = (1 << 61) - 1;

static STR_HASHER: LazyLock<ahash::RandomState> = LazyLock::new(|| {
    ahash::RandomState::with_seeds(
        0x243f_6a88_85a3_08d3,
        0x1319_8a2e_0370_7344,
        0xa409_3822_299f_31d0,
        0x082e_fa98_ec4e_6c89,
    )
});

#[must_use]
pub(crate) fn hash_int(value: i64) -> u64 {
    let reduced = value.unsigned_abs() % MODULUS;
    let signed = if value < 0 { -(reduced.cast_signed()) } else { reduced.cast_signed() };
    let adjusted = if signed == -1 { -2 } else { signed };
    adjusted.cast_unsigned()
}

#[must_use]
pub(crate) fn hash_bigint(value: &BigInt) -> u64 {
    if let Some(small) = value.to_i64() {
        return hash_int(small);
    }
    let modulus = BigInt::from(MODULUS);
    let reduced = (value.abs() % &modulus).to_i64().unwrap_or_default();
    let signed = if value.is_negative() { -reduced } else { reduced };
    let adjusted = if signed == -1 { -2 } else { signed };
    adjusted.cast_unsigned()
}

#[must_use]
pub(crate) fn hash_float(value: f64) -> u64 {
    if value.is_nan() {
        return 0;
    }
    if value.is_infinite() {
        return if value > 0.0 { 314_159 } else { (-314_159_i64).cast_unsigned() };
    }
    match integral_float(value) {
        Some(int) => hash_int(int),
        None => STR_HASHER.hash_one(value.to_bits()),
    }
}

#[expect(clippy::cast_possible_truncation, reason = "range checked before the cast")]
fn integral_float(value: f64) -> Option<i64> {
    (value.fract() == 0.0 && value >= i64::MIN as f64 && value < i64::MAX as f64).then(|| value as i64)
}

#[must_use]
pub(crate) fn hash_str(value: &str) -> u64 {
    if value.is_empty() {
        return 0;
    }
    STR_HASHER.hash_one(value)
}

#[must_use]
pub(crate) fn hash_bytes(value: &[u8]) -> u64 {
    if value.is_empty() {
        return 0;
    }
    STR_HASHER.hash_one(value)
}

/// Tuple hash mixing in the style of xxHash rounds.
#[must_use]
pub(crate) fn hash_tuple(items: impl IntoIterator<Item = u64>) -> u64 {
    const PRIME1: u64 = 11_400_714_785_074_694_791;
    const PRIME2: u64 = 14_029_467_366_897_019_727;
    const PRIME5: u64 = 2_870_177_450_012_600_261;
    let mut acc = PRIME5;
    let mut len = 0_u64;
    for lane in items {
        acc = acc.wrapping_add(lane.wrapping_mul(PRIME2));
        acc = acc.rotate_left(31);
        acc = acc.wrapping_mul(PRIME1);
        len += 1;
    }
    acc.wrapping_add(len ^ (PRIME5 ^ 3_527_539))
}

/// Identity hash for objects compared by identity.
#[must_use]
pub(crate) fn hash_identity(addr: usize) -> u64 {
    (addr as u64).rotate_right(4)
}

/// Hashes a value usable as a dictionary key.
///
/// Mutable containers are unhashable. Objects without value semantics (functions, classes,
/// instances) hash by identity.
pub fn hash_value(value: &Value) -> RunResult<u64> {
    Ok(match value {
        Value::None => hash_identity(0x5f5f_4e6f_6e65),
        Value::NotImplemented => hash_identity(0x4e6f_7449_6d70),
        Value::Bool(b) => hash_int(i64::from(*b)),
        Value::Int(i) => hash_int(*i),
        Value::Long(big) => hash_bigint(big),
        Value::Float(f) => hash_float(*f),
        Value::Str(s) => hash_str(s),
        Value::Bytes(b) => hash_bytes(b),
        Value::Tuple(items) => {
            let lanes = items.iter().map(hash_value).collect::<RunResult<Vec<_>>>()?;
            hash_tuple(lanes)
        }
        Value::List(_) | Value::Dict(_) | Value::Set(_) => {
            return Err(ExcType::type_error_unhashable(value.type_name()));
        }
        other => hash_identity(other.addr()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_numbers_hash_equal() {
        assert_eq!(hash_int(1), hash_float(1.0));
        assert_eq!(hash_int(-7), hash_float(-7.0));
        assert_eq!(hash_int(12), hash_bigint(&BigInt::from(12)));
        assert_eq!(hash_value(&Value::Bool(true)).unwrap(), hash_int(1));
    }

    #[test]
    fn minus_one_is_remapped() {
        assert_eq!(hash_int(-1), hash_int(-2));
    }

    #[test]
    fn strings_are_stable() {
        assert_eq!(hash_str("abc"), hash_str("abc"));
        assert_ne!(hash_str("abc"), hash_str("abd"));
        assert_eq!(hash_str(""), 0);
    }

    #[test]
    fn lists_are_unhashable() {
        let err = hash_value(&Value::list(vec![])).unwrap_err();
        assert!(err.matches_type(ExcType::TypeError));
    }
}
