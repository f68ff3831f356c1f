use super::Quantity;

/// Hours, used only where a quantity needs to be divided or multiplied by
/// a duration (e.g. `Kilowatts * Hours -> KilowattHours`). Minute offsets
/// themselves are plain `i64`/`u32` throughout the crate — see
/// [`crate::core::series::Minute`].
pub type Hours = Quantity<f64, 0, 1, 0>;

impl Hours {
    #[must_use]
    pub fn from_minutes(minutes: f64) -> Self {
        Self(minutes / 60.0)
    }
}
