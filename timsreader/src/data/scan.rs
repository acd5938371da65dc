use serde::Serialize;

use tofcore::data::spectrum::{DissociationType, MzRange, MzSpectrum, Polarity};
use tofcore::timstof::filter::FilteringParams;
use tofcore::timstof::merge::TofSpectraMerger;

use crate::error::Result;

/// Precursor id carried by MS1 scans built from frames in which no
/// precursor was isolated.
pub const SENTINEL_PRECURSOR_ID: i64 = -1;

/// One reconstructed scan: an averaged MS1 mobility-range scan or a
/// precursor's merged PASEF fragmentation scan.
///
/// Scan numbers stay `None` until the single-threaded numbering pass runs
/// over the finished scan set; a populated spectrum with an empty number is
/// a scan that has not been published yet.
#[derive(Debug, Clone, Serialize)]
pub struct TimsDataScan {
    pub spectrum: MzSpectrum,
    pub ms_order: u8,
    pub is_centroid: bool,
    pub polarity: Polarity,
    /// Retention time in minutes.
    pub retention_time: f64,
    pub total_ion_current: f64,
    /// Accumulation time in milliseconds; summed over the frame range for
    /// merged MS2 scans.
    pub injection_time: f64,
    pub native_id: String,
    /// The acquisition m/z window of the run.
    pub scan_window: MzRange,
    /// All frames contributing to this scan, ascending. One entry for MS1.
    pub frame_ids: Vec<i64>,
    /// One-based mobility scan range, start inclusive, end exclusive.
    pub scan_start: i64,
    pub scan_end: i64,
    pub median_one_over_k0: f64,
    pub precursor_id: i64,

    // MS2-only metadata
    pub isolation_mz: Option<f64>,
    pub isolation_width: Option<f64>,
    pub collision_energy: Option<f64>,
    pub selected_ion_mz: Option<f64>,
    pub selected_ion_monoisotopic_mz: Option<f64>,
    pub selected_ion_charge: Option<i64>,
    pub selected_ion_intensity: Option<f64>,
    pub dissociation_type: Option<DissociationType>,

    /// Assigned by the numbering pass, one-based and gapless.
    pub one_based_scan_number: Option<u32>,
    /// For MS2 scans, the assigned number of the MS1 scan of the precursor.
    pub one_based_precursor_scan_number: Option<u32>,

    /// Per-frame merged contributions in TOF index space, accumulated while
    /// the precursor's PASEF frames are decoded and consumed by
    /// `sum_components`.
    #[serde(skip)]
    pub(crate) components: Vec<(Vec<u32>, Vec<u64>)>,
}

impl TimsDataScan {
    pub fn native_id_ms1(frame_id: i64, scan_start: i64, scan_end: i64, precursor_id: i64) -> String {
        format!(
            "frame={};scans={}-{};precursor={}",
            frame_id, scan_start, scan_end, precursor_id
        )
    }

    pub fn native_id_ms2(
        first_frame_id: i64,
        last_frame_id: i64,
        scan_start: i64,
        scan_end: i64,
    ) -> String {
        format!(
            "frames={}-{};scans={}-{}",
            first_frame_id, last_frame_id, scan_start, scan_end
        )
    }

    /// MRM scans merge one frame and carry no precursor id.
    pub fn native_id_mrm(frame_id: i64, scan_start: i64, scan_end: i64) -> String {
        format!("frame={};scans={}-{}", frame_id, scan_start, scan_end)
    }

    pub fn is_sentinel(&self) -> bool {
        self.precursor_id == SENTINEL_PRECURSOR_ID
    }

    pub fn first_frame_id(&self) -> i64 {
        self.frame_ids[0]
    }

    /// Stash one frame's merged contribution for later summing.
    pub fn add_component(&mut self, indices: Vec<u32>, intensities: Vec<u64>) {
        self.components.push((indices, intensities));
    }

    pub fn has_components(&self) -> bool {
        !self.components.is_empty()
    }

    /// Merge, collapse, and centroid the accumulated components into the
    /// final spectrum, then drop them. The total ion current is the sum of
    /// the raw component intensities, taken before the noise floor and any
    /// filtering are applied.
    pub fn sum_components(
        &mut self,
        merger: &TofSpectraMerger,
        mz_lookup: &[f64],
        filtering: Option<&FilteringParams>,
    ) -> Result<()> {
        let components = std::mem::take(&mut self.components);
        self.total_ion_current = raw_ion_current(&components);
        self.spectrum = merger.merge_to_spectrum(&components, self.ms_order, mz_lookup, filtering)?;
        Ok(())
    }
}

/// Sum of all intensities across a set of (index, intensity) component
/// arrays, i.e. the total ion current of the underlying raw scans.
pub(crate) fn raw_ion_current(components: &[(Vec<u32>, Vec<u64>)]) -> f64 {
    components
        .iter()
        .map(|(_, intensities)| intensities.iter().sum::<u64>())
        .sum::<u64>() as f64
}
