use crate::data_structures::Baseline;

/// Numeric helpers shared by the detector, allocator and budget checker.
pub struct Calculator;

impl Calculator {
    pub fn new() -> Self {
        Self
    }

    /// Mean, population standard deviation, min and max of `values`.
    /// An empty slice yields an empty baseline.
    pub fn calculate_baseline(&self, values: &[f64]) -> Baseline {
        if values.is_empty() {
            return Baseline::default();
        }

        let count = values.len();
        let mean = values.iter().sum::<f64>() / count as f64;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Baseline::new(mean, variance.sqrt(), min, max, count)
    }

    /// None when the baseline has no spread to score against.
    pub fn calculate_z_score(&self, value: f64, baseline: &Baseline) -> Option<f64> {
        if baseline.std_dev() == 0.0 {
            return None;
        }
        Some((value - baseline.mean()) / baseline.std_dev())
    }

    /// None when the reference is zero and there is no ratio to report.
    pub fn calculate_percent_change(&self, value: f64, reference: f64) -> Option<f64> {
        if reference == 0.0 {
            return None;
        }
        Some((value - reference) / reference * 100.0)
    }

    pub fn calculate_percent_used(&self, spend: f64, limit: f64) -> f64 {
        spend / limit * 100.0
    }

    /// `amount * weight / total_weight`, or None when there is no weight to
    /// split against.
    pub fn calculate_proportional_share(
        &self,
        amount: f64,
        weight: f64,
        total_weight: f64,
    ) -> Option<f64> {
        if total_weight == 0.0 {
            return None;
        }
        Some(amount * weight / total_weight)
    }
}

impl Default for Calculator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_baseline() {
        let calculator = Calculator::new();
        let baseline = calculator.calculate_baseline(&[90.0, 110.0, 90.0, 110.0]);

        assert_eq!(baseline.mean(), 100.0);
        assert_eq!(baseline.std_dev(), 10.0);
        assert_eq!(baseline.min(), 90.0);
        assert_eq!(baseline.max(), 110.0);
        assert_eq!(baseline.count(), 4);
    }

    #[test]
    fn test_empty_baseline() {
        let calculator = Calculator::new();
        let baseline = calculator.calculate_baseline(&[]);
        assert!(baseline.is_empty());
        assert_eq!(baseline.mean(), 0.0);
    }

    #[test]
    fn test_constant_series_has_no_z_score() {
        let calculator = Calculator::new();
        let baseline = calculator.calculate_baseline(&[50.0, 50.0, 50.0]);
        assert_eq!(baseline.std_dev(), 0.0);
        assert!(calculator.calculate_z_score(500.0, &baseline).is_none());
    }

    #[test]
    fn test_calculate_z_score() {
        let calculator = Calculator::new();
        let baseline = Baseline::new(100.0, 10.0, 90.0, 110.0, 4);
        assert_eq!(calculator.calculate_z_score(135.0, &baseline), Some(3.5));
        assert_eq!(calculator.calculate_z_score(80.0, &baseline), Some(-2.0));
    }

    #[test]
    fn test_calculate_percent_change() {
        let calculator = Calculator::new();
        assert_eq!(calculator.calculate_percent_change(135.0, 100.0), Some(35.0));
        assert_eq!(calculator.calculate_percent_change(40.0, 80.0), Some(-50.0));
        assert_eq!(calculator.calculate_percent_change(50.0, 0.0), None);
    }

    #[test]
    fn test_proportional_share() {
        let calculator = Calculator::new();
        assert_eq!(calculator.calculate_proportional_share(100.0, 60.0, 100.0), Some(60.0));
        assert!(calculator.calculate_proportional_share(100.0, 0.0, 0.0).is_none());
    }
}
