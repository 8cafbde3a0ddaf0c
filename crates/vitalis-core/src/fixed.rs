use fixed::types::I32F32;

/// Q32.32 fixed-point: 32 integer bits, 32 fractional bits.
pub type Fixed64 = I32F32;

/// Simulation time in seconds, stored as fixed-point.
pub type Seconds = Fixed64;

/// Tolerance used by `==` and `!=` trigger comparisons.
pub const DEFAULT_EPSILON: f64 = 0.001;

/// Convert an f64 to Fixed64. Use only for initialization, never in sim loop.
/// Non-finite input maps to zero.
#[inline]
pub fn f64_to_fixed64(v: f64) -> Fixed64 {
    Fixed64::checked_from_num(v).unwrap_or(Fixed64::ZERO)
}

/// Convert Fixed64 to f64. Use only for display, never in sim loop.
#[inline]
pub fn fixed64_to_f64(v: Fixed64) -> f64 {
    v.to_num::<f64>()
}

/// Whether `a` and `b` differ by strictly less than `epsilon`.
#[inline]
pub fn approx_eq(a: Fixed64, b: Fixed64, epsilon: Fixed64) -> bool {
    a.abs_diff(b) < epsilon.unsigned_abs()
}

/// Raise `base` to a small non-negative integer power with saturation.
pub fn saturating_powi(base: Fixed64, exp: u32) -> Fixed64 {
    let mut acc = Fixed64::ONE;
    for _ in 0..exp {
        acc = acc.saturating_mul(base);
    }
    acc
}
