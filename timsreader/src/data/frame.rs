use crate::error::{Result, TimsReaderError};

/// Decoded payload of one frame, as returned by the vendor scan reader.
///
/// Layout (N = number of mobility scans in the frame):
///   N x u32: number of peaks in each of the N scans
///   N x (two u32 runs: first TOF indices, then intensities)
///
/// Specific scans are reached by summing the peak counts of all earlier
/// scans and jumping forward by twice that amount.
#[derive(Debug, Clone)]
pub struct FrameProxy {
    pub frame_id: i64,
    num_scans: usize,
    payload: Vec<u32>,
    /// Partial sums of the first `num_scans` peak-count words. Strictly
    /// non-decreasing, length `num_scans + 1`, `scan_offsets[0] == 0`.
    scan_offsets: Vec<u64>,
}

impl FrameProxy {
    pub fn new(frame_id: i64, num_scans: usize, payload: Vec<u32>) -> Result<FrameProxy> {
        if payload.len() < num_scans {
            return Err(TimsReaderError::CorruptFrame {
                frame_id,
                detail: format!(
                    "payload has {} words but the frame reports {} scans",
                    payload.len(),
                    num_scans
                ),
            });
        }
        let mut scan_offsets = Vec::with_capacity(num_scans + 1);
        let mut running_total: u64 = 0;
        scan_offsets.push(0);
        for peak_count in &payload[..num_scans] {
            running_total += *peak_count as u64;
            scan_offsets.push(running_total);
        }
        Ok(FrameProxy {
            frame_id,
            num_scans,
            payload,
            scan_offsets,
        })
    }

    pub fn num_scans(&self) -> usize {
        self.num_scans
    }

    /// Checks every scan offset against the payload bounds. Corrupted
    /// `.tdf_bin` files produce offsets past the end of the payload.
    pub fn validate(&self) -> Result<()> {
        let payload_len = self.payload.len() as u64;
        for offset in &self.scan_offsets {
            if *offset > payload_len {
                return Err(TimsReaderError::CorruptFrame {
                    frame_id: self.frame_id,
                    detail: format!(
                        "scan offset {} exceeds payload length {}",
                        offset, payload_len
                    ),
                });
            }
        }
        Ok(())
    }

    pub fn peak_count(&self, scan: usize) -> Result<usize> {
        self.check_scan(scan)?;
        Ok(self.payload[scan] as usize)
    }

    /// TOF index array of one zero-indexed mobility scan.
    pub fn scan_indices(&self, scan: usize) -> Result<&[u32]> {
        let range = self.scan_range(scan, 0)?;
        Ok(&self.payload[range])
    }

    /// Intensity array of one zero-indexed mobility scan.
    pub fn scan_intensities(&self, scan: usize) -> Result<&[u32]> {
        self.check_scan(scan)?;
        let peak_count = self.payload[scan] as usize;
        let range = self.scan_range(scan, peak_count)?;
        Ok(&self.payload[range])
    }

    fn check_scan(&self, scan: usize) -> Result<()> {
        if scan >= self.num_scans {
            return Err(TimsReaderError::ScanOutOfRange {
                frame_id: self.frame_id,
                scan,
                num_scans: self.num_scans,
            });
        }
        Ok(())
    }

    /// Start (inclusive) and end (exclusive) payload indices of one scan's
    /// data run. `offset` is 0 for indices, the scan's peak count for
    /// intensities. The end is clamped to the payload length; a start past
    /// the end marks a corrupted file.
    fn scan_range(&self, scan: usize, offset: usize) -> Result<std::ops::Range<usize>> {
        self.check_scan(scan)?;
        let peak_count = self.payload[scan] as usize;
        let start = self.num_scans + 2 * self.scan_offsets[scan] as usize + offset;
        // A zero-peak scan may legitimately start exactly at the end of the
        // payload; anything further, or a non-empty run starting at or past
        // the end, is a truncated file.
        if start > self.payload.len() || (peak_count > 0 && start >= self.payload.len()) {
            return Err(TimsReaderError::CorruptFrame {
                frame_id: self.frame_id,
                detail: format!(
                    "scan {} data starts at word {} but the payload holds {} words",
                    scan,
                    start,
                    self.payload.len()
                ),
            });
        }
        let end = std::cmp::min(self.payload.len(), start + peak_count);
        Ok(start..end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2 scans: scan 0 has 3 peaks, scan 1 has 2.
    // Layout: [3, 2 | idx0 x3, int0 x3 | idx1 x2, int1 x2]
    fn two_scan_payload() -> Vec<u32> {
        vec![3, 2, 10, 11, 12, 5, 6, 7, 20, 21, 8, 9]
    }

    #[test]
    fn test_scan_slicing() {
        let frame = FrameProxy::new(1, 2, two_scan_payload()).unwrap();
        frame.validate().unwrap();
        assert_eq!(frame.peak_count(0).unwrap(), 3);
        assert_eq!(frame.scan_indices(0).unwrap(), &[10, 11, 12]);
        assert_eq!(frame.scan_intensities(0).unwrap(), &[5, 6, 7]);
        assert_eq!(frame.scan_indices(1).unwrap(), &[20, 21]);
        assert_eq!(frame.scan_intensities(1).unwrap(), &[8, 9]);
    }

    #[test]
    fn test_empty_scan() {
        // scan 1 has zero peaks
        let payload = vec![2, 0, 30, 31, 4, 5];
        let frame = FrameProxy::new(7, 2, payload).unwrap();
        assert_eq!(frame.scan_indices(1).unwrap(), &[] as &[u32]);
        assert_eq!(frame.scan_intensities(1).unwrap(), &[] as &[u32]);
    }

    #[test]
    fn test_scan_out_of_range() {
        let frame = FrameProxy::new(1, 2, two_scan_payload()).unwrap();
        match frame.scan_indices(2) {
            Err(TimsReaderError::ScanOutOfRange { scan, num_scans, .. }) => {
                assert_eq!(scan, 2);
                assert_eq!(num_scans, 2);
            }
            other => panic!("expected ScanOutOfRange, got {:?}", other.map(|s| s.len())),
        }
    }

    #[test]
    fn test_truncated_payload_is_corrupt() {
        // peak counts claim 3+2 peaks but the runs are missing entirely
        let frame = FrameProxy::new(3, 2, vec![3, 2]).unwrap();
        assert!(matches!(
            frame.scan_indices(0),
            Err(TimsReaderError::CorruptFrame { frame_id: 3, .. })
        ));
    }

    #[test]
    fn test_zero_peak_scan_past_payload_is_corrupt() {
        // scan 0 claims one peak but only the index run is present; scan 1
        // has zero peaks and its computed start lands past the payload end
        let frame = FrameProxy::new(1, 2, vec![1, 0, 10]).unwrap();
        frame.validate().unwrap();
        assert!(matches!(
            frame.scan_indices(1),
            Err(TimsReaderError::CorruptFrame { frame_id: 1, .. })
        ));
        assert!(matches!(
            frame.scan_intensities(1),
            Err(TimsReaderError::CorruptFrame { frame_id: 1, .. })
        ));
    }

    #[test]
    fn test_zero_peak_scan_at_payload_end() {
        // scan 1 is empty and starts exactly at the payload end, which is fine
        let frame = FrameProxy::new(1, 2, vec![1, 0, 10, 5]).unwrap();
        assert_eq!(frame.scan_indices(1).unwrap(), &[] as &[u32]);
    }

    #[test]
    fn test_payload_shorter_than_scan_count() {
        assert!(matches!(
            FrameProxy::new(9, 4, vec![1, 1]),
            Err(TimsReaderError::CorruptFrame { frame_id: 9, .. })
        ));
    }
}
