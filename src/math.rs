//! Small numeric helpers shared by the samplers.

/// ln(2 * pi).
pub const LOG_2_PI: f64 = 1.8378770664093453;

/// `x * x`.
#[inline(always)]
pub fn square(x: f64) -> f64 {
    x * x
}

/// The logistic function, mapping a log odds to a probability.
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Inverse of [`sigmoid`].  The argument must lie strictly inside (0, 1).
#[inline]
pub fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}
