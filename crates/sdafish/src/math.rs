//! Log-space probability arithmetic.

/// Log of zero probability.
pub const LOG_0: f64 = f64::NEG_INFINITY;
/// Log of unit probability.
pub const LOG_1: f64 = 0.0;

/// Stable `log(exp(a) + exp(b))`.
pub fn log_add(a: f64, b: f64) -> f64 {
    if a == LOG_0 {
        return b;
    }
    if b == LOG_0 {
        return a;
    }
    let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
    hi + (lo - hi).exp().ln_1p()
}

/// Stable `log(exp(a) - exp(b))`; requires `a >= b`.
pub fn log_sub(a: f64, b: f64) -> f64 {
    if b == LOG_0 {
        return a;
    }
    if a == b {
        return LOG_0;
    }
    a + (-((b - a).exp())).ln_1p()
}

/// Stable `log(sum_i exp(values[i]))`.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let mut sum = LOG_0;
    for &v in values {
        sum = log_add(sum, v);
    }
    sum
}
