//! Cost arithmetic.

use crate::HOURS_PER_MONTH;

/// Monthly cost for an hourly cost, using the fixed 720 hour month.
///
/// # Example
///
/// ```
/// use redc_cost::verified::monthly_from_hourly;
///
/// assert_eq!(monthly_from_hourly(3.5), 2520.0);
/// ```
#[inline]
pub fn monthly_from_hourly(hourly: f64) -> f64 {
    hourly * HOURS_PER_MONTH
}

/// Multiply unit prices by `count`, returning `(total_hourly, total_monthly)`.
#[inline]
pub fn line_totals(unit_hourly: f64, unit_monthly: f64, count: u32) -> (f64, f64) {
    let count = f64::from(count);
    (unit_hourly * count, unit_monthly * count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_totals() {
        assert_eq!(line_totals(0.5, 360.0, 3), (1.5, 1080.0));
        assert_eq!(line_totals(0.5, 360.0, 0), (0.0, 0.0));
    }
}
