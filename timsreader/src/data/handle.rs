use std::sync::Mutex;

use tracing::debug;

use tofcore::data::spectrum::Polarity;

use crate::data::frame::FrameProxy;
use crate::data::meta::FrameTable;
use crate::data::raw::{ConversionFunction, TimsRawDataSource};
use crate::error::{Result, TimsReaderError};

/// Initial read buffer, in u32 words.
const DEFAULT_BUFFER_WORDS: usize = 4096;
/// Hard cap on a single frame payload, in bytes.
const MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

/// Shared access point for the vendor binary source: frame reads, unit
/// conversions, and the per-frame metadata needed to label scans.
///
/// The vendor handle is not thread-safe, so every raw read and every
/// conversion call takes the one `Mutex` here. The two lookup tables are
/// built once from the file's median frame (per-frame calibrations differ
/// only negligibly) and shared read-only afterwards.
pub struct TimsDataHandle {
    source: Mutex<Box<dyn TimsRawDataSource + Send>>,
    pub frame_table: FrameTable,
    /// TOF index -> m/z, domain `[0, digitizer_samples)`.
    mz_lookup: Vec<f64>,
    /// Zero-indexed mobility scan -> 1/K0, domain `[0, max_scan_count)`.
    one_over_k0_lookup: Vec<f64>,
}

impl TimsDataHandle {
    pub fn new(
        source: Box<dyn TimsRawDataSource + Send>,
        frame_table: FrameTable,
        digitizer_samples: i64,
    ) -> Result<TimsDataHandle> {
        let median_frame_id = frame_table.median_frame_id()?;
        let max_scans = frame_table.max_num_scans();

        let index_domain: Vec<f64> = (0..digitizer_samples).map(|i| i as f64).collect();
        let mz_lookup = source.convert(median_frame_id, ConversionFunction::IndexToMz, &index_domain)?;

        let scan_domain: Vec<f64> = (0..max_scans).map(|s| s as f64).collect();
        let one_over_k0_lookup =
            source.convert(median_frame_id, ConversionFunction::ScanToOneOverK0, &scan_domain)?;

        debug!(
            median_frame_id,
            mz_entries = mz_lookup.len(),
            mobility_entries = one_over_k0_lookup.len(),
            "built calibration lookup tables"
        );

        Ok(TimsDataHandle {
            source: Mutex::new(source),
            frame_table,
            mz_lookup,
            one_over_k0_lookup,
        })
    }

    /// Read and decode the full scan payload of one frame. Starts with a
    /// small buffer and retries with the size the source reports until the
    /// payload fits, bailing out if a frame claims more than the cap.
    pub fn get_frame(&self, frame_id: i64) -> Result<FrameProxy> {
        let num_scans = self.frame_table.num_scans(frame_id)? as usize;
        let mut buffer_words = DEFAULT_BUFFER_WORDS;

        loop {
            let mut buffer = vec![0u32; buffer_words];
            let required_bytes = {
                let source = self
                    .source
                    .lock()
                    .map_err(|_| TimsReaderError::Resource("raw source lock poisoned".to_string()))?;
                source.read_scans(frame_id, 0, num_scans as u32, &mut buffer)?
            };

            if (buffer_words * 4) as u32 > required_bytes {
                buffer.truncate(required_bytes as usize / 4);
                let frame = FrameProxy::new(frame_id, num_scans, buffer)?;
                frame.validate()?;
                return Ok(frame);
            }

            if required_bytes > MAX_FRAME_BYTES {
                return Err(TimsReaderError::FrameTooLarge {
                    frame_id,
                    required_bytes,
                });
            }

            debug!(frame_id, required_bytes, "growing frame read buffer");
            buffer_words = required_bytes as usize / 4 + 1;
        }
    }

    /// Batched unit conversion in the calibration context of `frame_id`.
    pub fn convert(
        &self,
        frame_id: i64,
        func: ConversionFunction,
        values: &[f64],
    ) -> Result<Vec<f64>> {
        let source = self
            .source
            .lock()
            .map_err(|_| TimsReaderError::Resource("raw source lock poisoned".to_string()))?;
        source.convert(frame_id, func, values)
    }

    /// Map TOF indices to m/z through the global lookup table.
    pub fn convert_indices_to_mz(&self, indices: &[u32]) -> Result<Vec<f64>> {
        let mut mz = Vec::with_capacity(indices.len());
        for &index in indices {
            let value = self.mz_lookup.get(index as usize).ok_or(
                TimsReaderError::LookupOutOfRange {
                    index: index as usize,
                    len: self.mz_lookup.len(),
                },
            )?;
            mz.push(*value);
        }
        Ok(mz)
    }

    pub fn mz_lookup(&self) -> &[f64] {
        &self.mz_lookup
    }

    /// 1/K0 at a one-based, possibly fractional mobility scan number.
    /// Fractional scans interpolate between the neighboring table entries.
    pub fn one_over_k0(&self, median_scan: f64) -> Result<f64> {
        let lookup = |scan: i64| -> Result<f64> {
            let idx = scan - 1;
            if idx < 0 || idx as usize >= self.one_over_k0_lookup.len() {
                return Err(TimsReaderError::LookupOutOfRange {
                    index: idx.max(0) as usize,
                    len: self.one_over_k0_lookup.len(),
                });
            }
            Ok(self.one_over_k0_lookup[idx as usize])
        };

        if median_scan.fract() == 0.0 {
            lookup(median_scan as i64)
        } else {
            let floor = lookup(median_scan.floor() as i64)?;
            let ceil = lookup(median_scan.ceil() as i64)?;
            Ok((floor + ceil) / 2.0)
        }
    }

    pub fn polarity(&self, frame_id: i64) -> Result<Polarity> {
        match self.frame_table.polarity(frame_id)? {
            "+" => Ok(Polarity::Positive),
            _ => Ok(Polarity::Negative),
        }
    }

    /// Retention time in minutes; the Frames table stores seconds.
    pub fn retention_time(&self, frame_id: i64) -> Result<f64> {
        Ok(self.frame_table.time(frame_id)? / 60.0)
    }

    /// Accumulation time of one frame, in milliseconds.
    pub fn injection_time(&self, frame_id: i64) -> Result<f64> {
        self.frame_table.accumulation_time(frame_id)
    }

    /// Summed accumulation time over an inclusive frame id range, used for
    /// MS2 scans merged across several PASEF frames.
    pub fn injection_time_sum(&self, first_frame_id: i64, last_frame_id: i64) -> Result<f64> {
        let mut sum = 0.0;
        for frame_id in first_frame_id..=last_frame_id {
            sum += self.frame_table.accumulation_time(frame_id)?;
        }
        Ok(sum)
    }
}
