use itertools::Itertools;
use serde::{Serialize, Deserialize};

use crate::data::spectrum::MzSpectrum;

/// Optional peak filtering applied to a spectrum after centroiding: keep the
/// top N peaks per m/z window and/or drop peaks below a minimum ratio of the
/// base peak. Which MS orders are trimmed is opt-in per order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FilteringParams {
    pub peaks_per_window: Option<usize>,
    pub number_of_windows: Option<usize>,
    pub min_ratio_to_base_peak: Option<f64>,
    pub apply_to_ms1: bool,
    pub apply_to_msms: bool,
}

impl Default for FilteringParams {
    fn default() -> Self {
        FilteringParams {
            peaks_per_window: None,
            number_of_windows: None,
            min_ratio_to_base_peak: None,
            apply_to_ms1: true,
            apply_to_msms: true,
        }
    }
}

impl FilteringParams {
    pub fn applies_to(&self, ms_order: u8) -> bool {
        if ms_order == 1 {
            self.apply_to_ms1
        } else {
            self.apply_to_msms
        }
    }

    /// Applies the configured filters, returning a spectrum still sorted by m/z.
    pub fn filter(&self, spectrum: MzSpectrum) -> MzSpectrum {
        if spectrum.is_empty() {
            return spectrum;
        }

        let base_intensity = spectrum
            .base_peak()
            .map(|(idx, _)| spectrum.intensity[idx])
            .unwrap_or(0.0);

        let mut peaks: Vec<(f64, f64)> = spectrum
            .mz
            .into_iter()
            .zip(spectrum.intensity)
            .collect();

        if let Some(min_ratio) = self.min_ratio_to_base_peak {
            peaks.retain(|p| p.1 >= min_ratio * base_intensity);
        }

        if let Some(top_n) = self.peaks_per_window {
            let windows = self.number_of_windows.unwrap_or(1).max(1);
            peaks = Self::keep_top_n_per_window(peaks, top_n, windows);
        }

        let (mz, intensity) = peaks.into_iter().unzip();
        MzSpectrum::new(mz, intensity)
    }

    fn keep_top_n_per_window(
        peaks: Vec<(f64, f64)>,
        top_n: usize,
        windows: usize,
    ) -> Vec<(f64, f64)> {
        if peaks.is_empty() {
            return peaks;
        }

        let mz_min = peaks.first().map(|p| p.0).unwrap_or(0.0);
        let mz_max = peaks.last().map(|p| p.0).unwrap_or(0.0);
        let width = ((mz_max - mz_min) / windows as f64).max(f64::EPSILON);

        let window_of = |mz: f64| (((mz - mz_min) / width) as usize).min(windows - 1);

        let mut kept: Vec<(f64, f64)> = peaks
            .into_iter()
            .into_group_map_by(|p| window_of(p.0))
            .into_values()
            .flat_map(|mut group| {
                group.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
                group.truncate(top_n);
                group
            })
            .collect();

        kept.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_ratio_filter() {
        let params = FilteringParams {
            min_ratio_to_base_peak: Some(0.25),
            ..Default::default()
        };
        let spectrum = MzSpectrum::new(
            vec![100.0, 200.0, 300.0, 400.0],
            vec![5.0, 100.0, 20.0, 30.0],
        );

        let filtered = params.filter(spectrum);

        // base peak is 100, threshold 25: peaks at 100 (5) and 300 (20) go
        assert_eq!(filtered.mz, vec![200.0, 400.0]);
        assert_eq!(filtered.intensity, vec![100.0, 30.0]);
    }

    #[test]
    fn test_top_n_per_window() {
        let params = FilteringParams {
            peaks_per_window: Some(1),
            number_of_windows: Some(2),
            ..Default::default()
        };
        // windows: [100, 250) and [250, 400]
        let spectrum = MzSpectrum::new(
            vec![100.0, 200.0, 300.0, 400.0],
            vec![10.0, 50.0, 40.0, 20.0],
        );

        let filtered = params.filter(spectrum);

        assert_eq!(filtered.mz, vec![200.0, 300.0]);
        assert_eq!(filtered.intensity, vec![50.0, 40.0]);
    }

    #[test]
    fn test_empty_spectrum_passes_through() {
        let params = FilteringParams {
            peaks_per_window: Some(5),
            ..Default::default()
        };
        let filtered = params.filter(MzSpectrum::default());
        assert!(filtered.is_empty());
    }
}
