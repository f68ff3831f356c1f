use std::fmt::{Display, Formatter};

use super::Quantity;

/// A plain monetary cost (positive = spend, negative = earned via export).
pub type Cost = Quantity<f64, 0, 0, 1>;

impl Cost {
    pub const ONE_CENT: Self = Self(0.01);

    /// Round to two decimal places (monetary rounding, §4.3).
    #[must_use]
    pub fn round_2dp(self) -> Self {
        Self((self.0 * 100.0).round() / 100.0)
    }
}

impl Display for Cost {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:+.2}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn test_round_2dp() {
        assert_abs_diff_eq!(Cost::from(1.005).round_2dp().0, 1.01);
        assert_abs_diff_eq!(Cost::from(1.004).round_2dp().0, 1.00);
    }
}
