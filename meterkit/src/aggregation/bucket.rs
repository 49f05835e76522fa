/// Smallest power of ten at or above `value`, as an exponent.
fn ceil_log10(value: u64) -> u32 {
    if value <= 1 {
        0
    } else {
        (value - 1).ilog10() + 1
    }
}

/// The magnitude that keeps `FIGURES` significant figures of `value`.
fn magnitude<const FIGURES: u32>(value: u64) -> u64 {
    10_u64.pow(ceil_log10(value).saturating_sub(FIGURES))
}

/// Base 10 significant-figures bucketing - away from 0
fn bucket_10<const FIGURES: u32>(value: i64) -> i64 {
    if value == 0 {
        return 0;
    }
    let magnitude = magnitude::<FIGURES>(value.unsigned_abs());
    let figures = value.unsigned_abs().div_ceil(magnitude);
    // Near i64::MAX the rounded-up bucket no longer fits; the last bucket is i64::MAX.
    value.signum() * i64::try_from(figures * magnitude).unwrap_or(i64::MAX)
}

/// Base 10 significant-figures bucketing - the bucket just below `bucket_10`, toward -inf
fn bucket_10_below<const FIGURES: u32>(value: i64) -> i64 {
    if value == 0 {
        return -1;
    }
    let magnitude = magnitude::<FIGURES>(value.unsigned_abs());
    let figures = value.unsigned_abs().div_ceil(magnitude) as i64;
    (value.signum() * figures - 1).saturating_mul(magnitude as i64)
}

/// Base 10 significant-figures bucketing - away from 0
pub fn bucket_10_2_sigfigs(value: i64) -> i64 {
    bucket_10::<2>(value)
}

/// Base 10 significant-figures bucketing - toward -inf
pub fn bucket_10_below_2_sigfigs(value: i64) -> i64 {
    bucket_10_below::<2>(value)
}
