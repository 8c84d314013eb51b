use std::collections::VecDeque;

/// Fixed-size trailing window over an ordered series.
///
/// A statistic is only defined once the window holds `size` samples and every
/// one of them is present. Sums are taken over the samples currently held, so
/// nothing a sample contributed survives after it slides out.
#[derive(Debug, Clone)]
pub struct TrailingWindow {
    size: usize,
    samples: VecDeque<Option<f64>>,
}

impl TrailingWindow {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            samples: VecDeque::with_capacity(size + 1),
        }
    }

    /// Slide the window forward by one sample.
    pub fn push(&mut self, sample: Option<f64>) {
        self.samples.push_back(sample);
        if self.samples.len() > self.size {
            self.samples.pop_front();
        }
    }

    pub fn is_complete(&self) -> bool {
        self.size > 0 && self.samples.len() == self.size && self.samples.iter().all(Option::is_some)
    }

    pub fn sum(&self) -> Option<f64> {
        self.is_complete()
            .then(|| self.samples.iter().flatten().sum())
    }

    pub fn mean(&self) -> Option<f64> {
        self.sum().map(|s| s / self.size as f64)
    }
}

/// Trailing sums of `size` samples for every position; `None` until defined.
pub fn trailing_sums(series: &[Option<f64>], size: usize) -> Vec<Option<f64>> {
    let mut window = TrailingWindow::new(size);
    series
        .iter()
        .map(|s| {
            window.push(*s);
            window.sum()
        })
        .collect()
}

/// Trailing means of `size` samples for every position; `None` until defined.
pub fn trailing_means(series: &[Option<f64>], size: usize) -> Vec<Option<f64>> {
    let mut window = TrailingWindow::new(size);
    series
        .iter()
        .map(|s| {
            window.push(*s);
            window.mean()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undefined_until_full() {
        let sums = trailing_sums(&[Some(1.0), Some(2.0), Some(3.0), Some(4.0)], 3);
        assert_eq!(sums, vec![None, None, Some(6.0), Some(9.0)]);
    }

    #[test]
    fn test_gap_poisons_window_until_it_slides_out() {
        let series = [Some(1.0), None, Some(1.0), Some(1.0), Some(1.0)];
        let sums = trailing_sums(&series, 2);
        assert_eq!(sums, vec![None, None, None, Some(2.0), Some(2.0)]);
    }

    #[test]
    fn test_means() {
        let means = trailing_means(&[Some(2.0), Some(4.0), Some(6.0)], 2);
        assert_eq!(means, vec![None, Some(3.0), Some(5.0)]);
    }

    #[test]
    fn test_zero_week_after_fractional_week_sums_to_exact_zero() {
        let mut series: Vec<Option<f64>> =
            [7.9, 0.9, 0.3, 8.4, 4.3, 7.6, 0.0].into_iter().map(Some).collect();
        series.extend([Some(0.0); 7]);
        let sums = trailing_sums(&series, 7);
        assert_eq!(sums[13], Some(0.0));
        assert_eq!(trailing_means(&series, 7)[13], Some(0.0));
    }

    #[test]
    fn test_shorter_series_never_complete() {
        let series = vec![Some(1.0); 6];
        assert!(trailing_sums(&series, 7).iter().all(Option::is_none));
    }
}
