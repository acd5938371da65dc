use serde::Serialize;

use tofcore::timstof::filter::FilteringParams;

use crate::data::dda::TimsTofReader;
use crate::data::scan::TimsDataScan;
use crate::error::Result;

/// Convenience facade: open a `.d` directory, reconstruct every scan, and
/// hold on to the published sequence.
pub struct TimsTofDataset {
    pub reader: TimsTofReader,
    pub scans: Vec<TimsDataScan>,
}

impl TimsTofDataset {
    pub fn load(
        data_path: &str,
        bruker_lib_path: &str,
        num_threads: usize,
        filtering: Option<&FilteringParams>,
    ) -> Result<TimsTofDataset> {
        let reader = TimsTofReader::open(data_path, bruker_lib_path)?;
        let scans = reader.load(num_threads, filtering)?;
        Ok(TimsTofDataset { reader, scans })
    }

    pub fn num_scans(&self) -> usize {
        self.scans.len()
    }

    pub fn summaries(&self) -> Vec<ScanSummary> {
        self.scans.iter().map(ScanSummary::from_scan).collect()
    }
}

/// One row of the run summary the CLI prints, serializable to JSON.
#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub scan_number: Option<u32>,
    pub ms_order: u8,
    pub native_id: String,
    pub retention_time: f64,
    pub median_one_over_k0: f64,
    pub num_peaks: usize,
    pub total_ion_current: f64,
    pub precursor_id: i64,
    pub precursor_scan_number: Option<u32>,
}

impl ScanSummary {
    pub fn from_scan(scan: &TimsDataScan) -> ScanSummary {
        ScanSummary {
            scan_number: scan.one_based_scan_number,
            ms_order: scan.ms_order,
            native_id: scan.native_id.clone(),
            retention_time: scan.retention_time,
            median_one_over_k0: scan.median_one_over_k0,
            num_peaks: scan.spectrum.len(),
            total_ion_current: scan.total_ion_current,
            precursor_id: scan.precursor_id,
            precursor_scan_number: scan.one_based_precursor_scan_number,
        }
    }
}
