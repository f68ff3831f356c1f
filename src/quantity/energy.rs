use std::ops::{Div, Mul};

use super::{Quantity, cost::Cost, power::Kilowatts, rate::KilowattHourRate, time::Hours};

/// Kilowatt-hours: battery SOC, imported/exported energy, load, PV yield.
pub type KilowattHours = Quantity<f64, 1, 1, 0>;

impl KilowattHours {
    #[must_use]
    pub fn from_watt_hours(watt_hours: f64) -> Self {
        Self(watt_hours * 0.001)
    }
}

impl Mul<KilowattHourRate> for KilowattHours {
    type Output = Cost;

    fn mul(self, rhs: KilowattHourRate) -> Self::Output {
        Cost::from(self.0 * rhs.0)
    }
}

impl Div<Hours> for KilowattHours {
    type Output = Kilowatts;

    fn div(self, rhs: Hours) -> Self::Output {
        Quantity(self.0 / rhs.0)
    }
}

impl Div<Kilowatts> for KilowattHours {
    type Output = Hours;

    fn div(self, rhs: Kilowatts) -> Self::Output {
        Quantity(self.0 / rhs.0)
    }
}
