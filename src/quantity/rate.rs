use super::Quantity;

/// Euro (or local currency unit) per kilowatt-hour.
pub type KilowattHourRate = Quantity<f64, -1, -1, 1>;

impl KilowattHourRate {
    /// Compare to two decimal places, matching the source's rate-equality
    /// test in window scanning (§4.2: "Rate equality compares to two
    /// decimal places").
    #[must_use]
    pub fn eq_2dp(self, rhs: Self) -> bool {
        (self.0 * 100.0).round() == (rhs.0 * 100.0).round()
    }
}
