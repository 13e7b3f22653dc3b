//! Implementation of the range() builtin.

use crate::{
    args::{ArgValues, coerce_index},
    bytecode::Vm,
    exception::{ExcType, RunResult},
    value::Value,
};

/// Upper bound on the number of items `range()` materializes.
const MAX_RANGE_LEN: i64 = 1 << 28;

/// `range([start,] stop[, step])`, returning a list.
///
/// Float arguments are truncated with a `DeprecationWarning`.
pub fn builtin_range(vm: &mut Vm, args: ArgValues) -> RunResult<Value> {
    let count = args.count();
    let (start, stop, step) = match count {
        1 => (0, coerce_index(vm, &args.get_one_arg("range")?)?, 1),
        2 => {
            let (start, stop) = args.get_two_args("range")?;
            (coerce_index(vm, &start)?, coerce_index(vm, &stop)?, 1)
        }
        3 => {
            let (start, stop, step) = args.get_three_args("range")?;
            (coerce_index(vm, &start)?, coerce_index(vm, &stop)?, coerce_index(vm, &step)?)
        }
        0 => return Err(ExcType::type_error_at_least("range", 1, count)),
        _ => return Err(ExcType::type_error_at_most("range", 3, count)),
    };
    if step == 0 {
        return Err(ExcType::value_error("range() step argument must not be zero"));
    }
    let len = range_len(start, stop, step);
    if len > MAX_RANGE_LEN {
        return Err(ExcType::OverflowError.error("range() result has too many items"));
    }
    let items = (0..len).map(|i| Value::Int(start + i * step)).collect();
    Ok(Value::list(items))
}

fn range_len(start: i64, stop: i64, step: i64) -> i64 {
    let (lo, hi, step) = if step > 0 { (start, stop, step) } else { (stop, start, -step) };
    if lo >= hi {
        return 0;
    }
    let span = i128::from(hi) - i128::from(lo);
    i64::try_from((span - 1) / i128::from(step) + 1).unwrap_or(i64::MAX)
}
