use std::ops::Mul;

use super::{Quantity, energy::KilowattHours, time::Hours};

/// Kilowatts: load power, PV power, charge/discharge rate (expressed as
/// kWh/min in the simulator's per-step arithmetic, but carried here in
/// kW for driver-facing values).
pub type Kilowatts = Quantity<f64, 1, 0, 0>;

impl Kilowatts {
    #[must_use]
    #[expect(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub fn into_watts_u32(self) -> u32 {
        (self.0 * 1000.0).round() as u32
    }
}

impl Mul<Hours> for Kilowatts {
    type Output = KilowattHours;

    fn mul(self, rhs: Hours) -> Self::Output {
        Quantity(self.0 * rhs.0)
    }
}
