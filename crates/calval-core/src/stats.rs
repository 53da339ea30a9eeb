/// Summary statistics over a set of reprojection errors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorStatistics {
    /// Number of samples.
    pub count: usize,
    /// Root mean square, `sqrt(mean(e²))`.
    pub rms: f64,
    /// Arithmetic mean.
    pub mean: f64,
    /// Population standard deviation.
    pub std: f64,
}

impl ErrorStatistics {
    /// Compute the statistics of `samples`.
    ///
    /// Returns `None` for an empty slice.
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let n = samples.len() as f64;

        let mean = samples.iter().sum::<f64>() / n;
        let mean_sq = samples.iter().map(|e| e * e).sum::<f64>() / n;
        let var = samples.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / n;

        Some(Self {
            count: samples.len(),
            rms: mean_sq.sqrt(),
            mean,
            std: var.sqrt(),
        })
    }
}
