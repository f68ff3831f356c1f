//! Const-generic typed units: every energy, power, rate, and cost value in
//! the crate flows through [`Quantity`] rather than a bare `f64`, so that a
//! misplaced multiplication becomes a type error instead of a silent unit
//! bug.

pub mod cost;
pub mod energy;
pub mod power;
pub mod rate;
pub mod time;

use std::ops::{Div, Mul};

use serde::{Deserialize, Serialize};

/// A physical quantity tagged by the exponents of its three base
/// dimensions: kilowatt-power, hours, and euro-cost. `Quantity<f64, 1, 0,
/// 0>` is kilowatts; `Quantity<f64, 1, 1, 0>` is kilowatt-hours;
/// `Quantity<f64, 1, -1, -1>` is euro per kilowatt-hour; `Quantity<f64, 0,
/// 0, 1>` is a plain cost.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    PartialEq,
    PartialOrd,
    Serialize,
    derive_more::Add,
    derive_more::AddAssign,
    derive_more::From,
    derive_more::FromStr,
    derive_more::Neg,
    derive_more::Sub,
    derive_more::SubAssign,
    derive_more::Sum,
)]
pub struct Quantity<T, const POWER: isize, const TIME: isize, const COST: isize>(pub T);

impl<const POWER: isize, const TIME: isize, const COST: isize> Quantity<f64, POWER, TIME, COST> {
    pub const ZERO: Self = Self(0.0);

    #[must_use]
    pub fn min(self, rhs: Self) -> Self {
        if rhs.0 < self.0 { rhs } else { self }
    }

    #[must_use]
    pub fn max(self, rhs: Self) -> Self {
        if rhs.0 > self.0 { rhs } else { self }
    }

    #[must_use]
    pub fn clamp(self, min: Self, max: Self) -> Self {
        Self(self.0.clamp(min.0, max.0))
    }

    #[must_use]
    pub fn is_zero(self) -> bool {
        self.0 == 0.0
    }

    /// Round up at the given number of decimal places, matching the
    /// source's `dp2`/`dp3` ceiling rounding for emitted telemetry.
    #[must_use]
    pub fn ceil_to(self, decimals: i32) -> Self {
        let factor = 10f64.powi(decimals);
        Self((self.0 * factor).ceil() / factor)
    }
}

impl<T, const POWER: isize, const TIME: isize, const COST: isize> Mul<f64>
    for Quantity<T, POWER, TIME, COST>
where
    T: Mul<f64, Output = T>,
{
    type Output = Self;

    fn mul(self, rhs: f64) -> Self::Output {
        Quantity(self.0 * rhs)
    }
}

impl<T, const POWER: isize, const TIME: isize, const COST: isize> Div<f64>
    for Quantity<T, POWER, TIME, COST>
where
    T: Div<f64, Output = T>,
{
    type Output = Self;

    fn div(self, rhs: f64) -> Self::Output {
        Quantity(self.0 / rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Bare = Quantity<f64, 0, 0, 0>;

    #[test]
    fn test_min_max() {
        assert_eq!(Bare::from(1.0).min(Bare::from(2.0)), Bare::from(1.0));
        assert_eq!(Bare::from(1.0).max(Bare::from(2.0)), Bare::from(2.0));
    }

    #[test]
    fn test_clamp() {
        assert_eq!(Bare::from(5.0).clamp(Bare::from(0.0), Bare::from(3.0)), Bare::from(3.0));
    }

    #[test]
    fn test_ceil_to() {
        assert_eq!(Bare::from(1.0001).ceil_to(3), Bare::from(1.001));
        assert_eq!(Bare::from(1.2).ceil_to(2), Bare::from(1.2));
    }
}
