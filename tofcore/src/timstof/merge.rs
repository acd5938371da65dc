use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::OnceLock;

use itertools::Itertools;

use crate::data::spectrum::MzSpectrum;
use crate::timstof::filter::FilteringParams;

/// Raw timsTOF scans do not store m/z values directly but indices into a
/// digitizer lookup table. All merge and collapse operations below therefore
/// work on parallel (TOF index, intensity) arrays and only leave index space
/// at the very end, when centroiding resolves indices against the global
/// index -> m/z lookup table.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    LookupOutOfRange { index: usize, len: usize },
}

impl Display for MergeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MergeError::LookupOutOfRange { index, len } => {
                write!(f, "TOF index {} out of range of the m/z lookup table (length {})", index, len)
            }
        }
    }
}

impl std::error::Error for MergeError {}

/// Merges two index-sorted arrays (with companion intensity arrays) into one
/// index-sorted array using a two-pointer technique. No deduplication is
/// performed, the output length is always the sum of the input lengths.
///
/// # Arguments
///
/// * `index_a`, `intensity_a` - First pair of parallel arrays.
/// * `index_b`, `intensity_b` - Second pair of parallel arrays.
///
/// # Panics
///
/// Panics if either pair of parallel arrays differs in length.
pub fn two_pointer_merge(
    index_a: &[u32],
    intensity_a: &[u64],
    index_b: &[u32],
    intensity_b: &[u64],
) -> (Vec<u32>, Vec<u64>) {
    assert_eq!(index_a.len(), intensity_a.len());
    assert_eq!(index_b.len(), intensity_b.len());

    let mut merged_indices = Vec::with_capacity(index_a.len() + index_b.len());
    let mut merged_intensities = Vec::with_capacity(index_a.len() + index_b.len());

    let mut p1 = 0;
    let mut p2 = 0;

    while p1 < index_a.len() && p2 < index_b.len() {
        if index_a[p1] < index_b[p2] {
            merged_indices.push(index_a[p1]);
            merged_intensities.push(intensity_a[p1]);
            p1 += 1;
        } else {
            merged_indices.push(index_b[p2]);
            merged_intensities.push(intensity_b[p2]);
            p2 += 1;
        }
    }

    merged_indices.extend_from_slice(&index_a[p1..]);
    merged_intensities.extend_from_slice(&intensity_a[p1..]);
    merged_indices.extend_from_slice(&index_b[p2..]);
    merged_intensities.extend_from_slice(&intensity_b[p2..]);

    (merged_indices, merged_intensities)
}

/// Merges k index-sorted arrays by folding `two_pointer_merge` left to right.
/// Returns empty arrays for an empty input.
pub fn merge_many(arrays: &[(Vec<u32>, Vec<u64>)]) -> (Vec<u32>, Vec<u64>) {
    let mut iter = arrays.iter();
    let (mut indices, mut intensities) = match iter.next() {
        Some((idx, int)) => (idx.clone(), int.clone()),
        None => return (Vec::new(), Vec::new()),
    };

    for (idx, int) in iter {
        let merged = two_pointer_merge(&indices, &intensities, idx, int);
        indices = merged.0;
        intensities = merged.1;
    }

    (indices, intensities)
}

/// Median of the given intensities, the average of the two middle values for
/// an even count. Returns 0.0 for an empty slice.
pub fn median_intensity(intensities: &[u64]) -> f64 {
    if intensities.is_empty() {
        return 0.0;
    }

    let sorted: Vec<u64> = intensities.iter().copied().sorted_unstable().collect();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid] as f64
    } else {
        (sorted[mid - 1] as f64 + sorted[mid] as f64) / 2.0
    }
}

/// Collapses a merged, index-sorted array: runs of equal consecutive index
/// values are summed into a single entry. When a noise floor is given,
/// collapsed entries whose summed intensity does not exceed the floor are
/// dropped.
///
/// # Panics
///
/// Panics if the parallel arrays differ in length.
pub fn collapse(
    indices: &[u32],
    intensities: &[u64],
    noise_floor: Option<f64>,
) -> (Vec<u32>, Vec<u64>) {
    assert_eq!(indices.len(), intensities.len());

    let mut collapsed_indices = Vec::with_capacity(indices.len());
    let mut collapsed_intensities = Vec::with_capacity(intensities.len());

    let mut p1 = 0;
    while p1 < indices.len() {
        let current = indices[p1];
        let mut summed = intensities[p1];

        let mut p2 = p1 + 1;
        while p2 < indices.len() && indices[p2] == current {
            summed += intensities[p2];
            p2 += 1;
        }

        let keep = match noise_floor {
            Some(floor) => summed as f64 > floor,
            None => true,
        };
        if keep {
            collapsed_indices.push(current);
            collapsed_intensities.push(summed);
        }

        p1 = p2;
    }

    (collapsed_indices, collapsed_intensities)
}

/// Centroids a collapsed, index-sorted array into an m/z spectrum.
///
/// A cluster starts at the current index and extends forward while the next
/// index is within +2 of the last index absorbed into the cluster, so long
/// chains of adjacent indices collapse into one peak. Each cluster yields the
/// summed intensity and the intensity-weighted mean of the member m/z values
/// resolved through `mz_lookup`. Singleton clusters pass through unchanged.
pub fn centroid(
    indices: &[u32],
    intensities: &[u64],
    mz_lookup: &[f64],
) -> Result<MzSpectrum, MergeError> {
    assert_eq!(indices.len(), intensities.len());

    let mut mz = Vec::with_capacity(indices.len());
    let mut intensity = Vec::with_capacity(intensities.len());

    let mut p1 = 0;
    while p1 < indices.len() {
        let mut last = indices[p1];
        let mut p2 = p1 + 1;
        while p2 < indices.len() && indices[p2] <= last + 2 {
            last = indices[p2];
            p2 += 1;
        }

        let summed: u64 = intensities[p1..p2].iter().sum();
        let mut weighted_mz = 0.0;
        for i in p1..p2 {
            let idx = indices[i] as usize;
            let member_mz = *mz_lookup.get(idx).ok_or(MergeError::LookupOutOfRange {
                index: idx,
                len: mz_lookup.len(),
            })?;
            weighted_mz += member_mz * (intensities[i] as f64 / summed as f64);
        }

        mz.push(weighted_mz);
        intensity.push(summed as f64);

        p1 = p2;
    }

    Ok(MzSpectrum::new(mz, intensity))
}

/// Combines per-scan raw arrays into finished spectra. Holds the per-MS-order
/// noise floors, computed once per file session from the first uncollapsed
/// merged array seen for that order and shared read-only afterwards.
#[derive(Debug, Default)]
pub struct TofSpectraMerger {
    ms1_noise_floor: OnceLock<f64>,
    ms2_noise_floor: OnceLock<f64>,
}

impl TofSpectraMerger {
    pub fn new() -> Self {
        TofSpectraMerger::default()
    }

    /// The cached noise floor for the given MS order, computing it from the
    /// supplied uncollapsed merged intensities on first use.
    pub fn noise_floor(&self, ms_order: u8, merged_intensities: &[u64]) -> f64 {
        let cell = match ms_order {
            1 => &self.ms1_noise_floor,
            _ => &self.ms2_noise_floor,
        };
        *cell.get_or_init(|| median_intensity(merged_intensities))
    }

    /// Merges k per-scan arrays into one index-sorted array without collapsing
    /// or centroiding. Used for per-frame MS2 contributions that are averaged
    /// across frames later.
    pub fn merge_components(arrays: &[(Vec<u32>, Vec<u64>)]) -> (Vec<u32>, Vec<u64>) {
        merge_many(arrays)
    }

    /// Runs the full Merge -> Collapse -> Centroid pipeline over per-scan raw
    /// arrays and applies the optional post-filter, yielding the final
    /// (m/z, intensity) spectrum.
    pub fn merge_to_spectrum(
        &self,
        arrays: &[(Vec<u32>, Vec<u64>)],
        ms_order: u8,
        mz_lookup: &[f64],
        filtering: Option<&FilteringParams>,
    ) -> Result<MzSpectrum, MergeError> {
        let (indices, intensities) = merge_many(arrays);

        let floor = self.noise_floor(ms_order, &intensities);
        let (collapsed_indices, collapsed_intensities) =
            collapse(&indices, &intensities, Some(floor));

        let spectrum = centroid(&collapsed_indices, &collapsed_intensities, mz_lookup)?;

        match filtering {
            Some(params) if params.applies_to(ms_order) => Ok(params.filter(spectrum)),
            _ => Ok(spectrum),
        }
    }
}
