use libloading::{Library, Symbol};
use std::os::raw::{c_char, c_double};

use crate::error::{Result, TimsReaderError};

/// Unit conversions exposed by the vendor library. Each variant maps to one
/// exported symbol taking parallel input/output double arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionFunction {
    IndexToMz,
    MzToIndex,
    ScanToOneOverK0,
    OneOverK0ToScan,
    ScanToVoltage,
    VoltageToScan,
}

impl ConversionFunction {
    pub fn symbol(&self) -> &'static [u8] {
        match self {
            ConversionFunction::IndexToMz => b"tims_index_to_mz",
            ConversionFunction::MzToIndex => b"tims_mz_to_index",
            ConversionFunction::ScanToOneOverK0 => b"tims_scannum_to_oneoverk0",
            ConversionFunction::OneOverK0ToScan => b"tims_oneoverk0_to_scannum",
            ConversionFunction::ScanToVoltage => b"tims_scannum_to_voltage",
            ConversionFunction::VoltageToScan => b"tims_voltage_to_scannum",
        }
    }
}

/// Abstraction over the vendor binary reader so the decoding and
/// reconstruction layers can be exercised against an in-memory source.
pub trait TimsRawDataSource {
    /// Read the packed scan payload of `frame_id` for scans
    /// `[scan_begin, scan_end)` into `buffer`. Returns the number of BYTES
    /// the full payload requires; when that exceeds `buffer.len() * 4` the
    /// buffer contents are undefined and the caller must retry larger.
    fn read_scans(
        &self,
        frame_id: i64,
        scan_begin: u32,
        scan_end: u32,
        buffer: &mut [u32],
    ) -> Result<u32>;

    /// Apply one of the vendor conversion functions to `values` in the
    /// calibration context of `frame_id`.
    fn convert(&self, frame_id: i64, func: ConversionFunction, values: &[f64]) -> Result<Vec<f64>>;
}

/// Owner of the loaded vendor shared library and the open handle to one
/// `.d` directory. The vendor handle is NOT thread-safe; callers serialize
/// access through a mutex one level up.
pub struct BrukerTimsDataLibrary {
    pub lib: Library,
    pub handle: u64,
}

impl BrukerTimsDataLibrary {
    /// Load the vendor shared library from `bruker_lib_path` and open a
    /// handle to the `.d` directory at `data_path`.
    ///
    /// # Arguments
    ///
    /// * `bruker_lib_path` - path to the timsdata shared library
    /// * `data_path` - path to the `.d` directory
    pub fn new(bruker_lib_path: &str, data_path: &str) -> Result<BrukerTimsDataLibrary> {
        let lib = unsafe { Library::new(bruker_lib_path)? };

        let handle = unsafe {
            let func: Symbol<unsafe extern "C" fn(*const c_char, u32) -> u64> =
                lib.get(b"tims_open")?;
            let path = std::ffi::CString::new(data_path).map_err(|_| {
                TimsReaderError::Resource(format!("data path contains NUL byte: {}", data_path))
            })?;
            func(path.as_ptr(), 0)
        };

        if handle == 0 {
            return Err(TimsReaderError::Resource(format!(
                "tims_open failed for: {}",
                data_path
            )));
        }

        Ok(BrukerTimsDataLibrary { lib, handle })
    }

    pub fn tims_close(&self) -> Result<()> {
        unsafe {
            let func: Symbol<unsafe extern "C" fn(u64)> = self.lib.get(b"tims_close")?;
            func(self.handle);
        }
        Ok(())
    }
}

impl TimsRawDataSource for BrukerTimsDataLibrary {
    fn read_scans(
        &self,
        frame_id: i64,
        scan_begin: u32,
        scan_end: u32,
        buffer: &mut [u32],
    ) -> Result<u32> {
        let required = unsafe {
            let func: Symbol<
                unsafe extern "C" fn(u64, i64, u32, u32, *mut u32, u32) -> u32,
            > = self.lib.get(b"tims_read_scans_v2")?;
            func(
                self.handle,
                frame_id,
                scan_begin,
                scan_end,
                buffer.as_mut_ptr(),
                (buffer.len() * 4) as u32,
            )
        };
        if required == 0 {
            return Err(TimsReaderError::CorruptFrame {
                frame_id,
                detail: "tims_read_scans_v2 returned 0 bytes".to_string(),
            });
        }
        Ok(required)
    }

    fn convert(&self, frame_id: i64, func: ConversionFunction, values: &[f64]) -> Result<Vec<f64>> {
        let mut out: Vec<c_double> = vec![0.0; values.len()];
        unsafe {
            let sym: Symbol<
                unsafe extern "C" fn(u64, i64, *const c_double, *mut c_double, u32) -> u32,
            > = self.lib.get(func.symbol())?;
            sym(
                self.handle,
                frame_id,
                values.as_ptr(),
                out.as_mut_ptr(),
                values.len() as u32,
            );
        }
        Ok(out)
    }
}

impl Drop for BrukerTimsDataLibrary {
    fn drop(&mut self) {
        if let Err(e) = self.tims_close() {
            eprintln!("error closing tims handle: {}", e);
        }
    }
}
