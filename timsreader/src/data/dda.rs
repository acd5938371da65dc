use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use rusqlite::Connection;
use tracing::{debug, info};

use tofcore::data::spectrum::{DissociationType, MzRange, MzSpectrum};
use tofcore::timstof::filter::FilteringParams;
use tofcore::timstof::merge::TofSpectraMerger;

use crate::data::acquisition::ScanMode;
use crate::data::frame::FrameProxy;
use crate::data::handle::TimsDataHandle;
use crate::data::meta::{
    open_tdf_connection, read_digitizer_num_samples, read_distinct_scan_modes, read_frame_table,
    read_max_precursor_id, read_mrm_record, read_ms1_records, read_mz_acquisition_range,
    read_pasef_records, Ms1Record, MrmRecord, PasefRecord,
};
use crate::data::raw::{BrukerTimsDataLibrary, TimsRawDataSource};
use crate::data::scan::{raw_ion_current, TimsDataScan, SENTINEL_PRECURSOR_ID};
use crate::error::{Result, TimsReaderError};

/// Reconstructs spectra from a timsTOF `.d` directory. In DDA-PASEF mode:
/// one averaged MS1 scan per isolated precursor and one merged MS2 scan per
/// precursor, published as a single gapless, one-based scan sequence. In MRM
/// mode: one merged MS2 scan per triggered frame, numbered in frame order.
pub struct TimsTofReader {
    data_path: PathBuf,
    handle: Arc<TimsDataHandle>,
    scan_mode: ScanMode,
    ms1_frame_ids: Vec<i64>,
    max_precursor_id: i64,
    scan_window: MzRange,
}

/// Scans produced by one worker over its chunk of MS1 frames.
struct ChunkScans {
    ms1: Vec<TimsDataScan>,
    pasef: Vec<TimsDataScan>,
}

impl TimsTofReader {
    /// Open a `.d` directory with the vendor shared library at
    /// `bruker_lib_path`. Both `analysis.tdf` and `analysis.tdf_bin` must be
    /// present.
    pub fn open(data_path: &str, bruker_lib_path: &str) -> Result<TimsTofReader> {
        let d_path = Path::new(data_path);
        for required in ["analysis.tdf", "analysis.tdf_bin"] {
            if !d_path.join(required).exists() {
                return Err(TimsReaderError::Resource(format!(
                    "missing {} in {}",
                    required, data_path
                )));
            }
        }
        let library = BrukerTimsDataLibrary::new(bruker_lib_path, data_path)?;
        TimsTofReader::from_source(data_path, Box::new(library))
    }

    /// Build a reader over an arbitrary raw source; `data_path` must still
    /// contain `analysis.tdf`. This is how tests substitute an in-memory
    /// source for the vendor library.
    pub fn from_source(
        data_path: &str,
        source: Box<dyn TimsRawDataSource + Send>,
    ) -> Result<TimsTofReader> {
        let conn = open_tdf_connection(data_path)?;

        let scan_modes = read_distinct_scan_modes(&conn)?;
        if scan_modes.len() > 1 {
            return Err(TimsReaderError::Consistency(format!(
                "file contains {} distinct scan modes",
                scan_modes.len()
            )));
        }
        let raw_mode = scan_modes.first().copied().unwrap_or(-1);
        let scan_mode = ScanMode::from(raw_mode);
        if !matches!(scan_mode, ScanMode::Pasef | ScanMode::Mrm) {
            return Err(TimsReaderError::UnsupportedScanMode(raw_mode));
        }

        let frame_table = read_frame_table(&conn)?;
        let ms1_frame_ids = frame_table.ms1_frame_ids();
        // MRM files carry no Precursors table
        let max_precursor_id = match scan_mode {
            ScanMode::Pasef => read_max_precursor_id(&conn)?,
            _ => 0,
        };
        let digitizer_samples = read_digitizer_num_samples(&conn)?;
        let (mz_lower, mz_upper) = read_mz_acquisition_range(&conn)?;

        info!(
            frames = frame_table.len(),
            ms1_frames = ms1_frame_ids.len(),
            max_precursor_id,
            "opened timsTOF dataset"
        );

        let handle = TimsDataHandle::new(source, frame_table, digitizer_samples)?;
        Ok(TimsTofReader {
            data_path: d_path_buf(data_path),
            handle: Arc::new(handle),
            scan_mode,
            ms1_frame_ids,
            max_precursor_id,
            scan_window: MzRange::new(mz_lower, mz_upper),
        })
    }

    pub fn scan_mode(&self) -> ScanMode {
        self.scan_mode
    }

    pub fn handle(&self) -> &Arc<TimsDataHandle> {
        &self.handle
    }

    pub fn num_ms1_frames(&self) -> usize {
        self.ms1_frame_ids.len()
    }

    /// Reconstruct all scans of the file. Frames are range-partitioned over
    /// a rayon pool, each worker decoding frames and building scans against
    /// its own SQLite connection, and the finished batches are published
    /// single-threaded into one numbered sequence.
    pub fn load(
        &self,
        num_threads: usize,
        filtering: Option<&FilteringParams>,
    ) -> Result<Vec<TimsDataScan>> {
        let num_threads = num_threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .map_err(|e| TimsReaderError::Resource(format!("thread pool: {}", e)))?;
        let merger = TofSpectraMerger::new();

        match self.scan_mode {
            ScanMode::Mrm => self.load_mrm(&pool, &merger, num_threads, filtering),
            _ => self.load_pasef(&pool, &merger, num_threads, filtering),
        }
    }

    fn load_pasef(
        &self,
        pool: &rayon::ThreadPool,
        merger: &TofSpectraMerger,
        num_threads: usize,
        filtering: Option<&FilteringParams>,
    ) -> Result<Vec<TimsDataScan>> {
        let chunk_size = std::cmp::max(1, self.ms1_frame_ids.len().div_ceil(num_threads));

        let chunk_results: Vec<Result<ChunkScans>> = pool.install(|| {
            self.ms1_frame_ids
                .par_chunks(chunk_size)
                .map(|chunk| self.process_chunk(chunk, merger, filtering))
                .collect()
        });

        // Slot worker batches into arenas indexed by precursor id, which
        // keeps publication deterministic no matter how chunks interleaved.
        let mut ms1_arena: Vec<Option<TimsDataScan>> =
            (0..self.max_precursor_id).map(|_| None).collect();
        let mut pasef_arena: Vec<Option<TimsDataScan>> =
            (0..self.max_precursor_id).map(|_| None).collect();
        let mut sentinels: Vec<TimsDataScan> = Vec::new();

        for chunk in chunk_results {
            let chunk = chunk?;
            for scan in chunk.ms1 {
                if scan.is_sentinel() {
                    sentinels.push(scan);
                } else {
                    slot_scan(&mut ms1_arena, scan)?;
                }
            }
            for scan in chunk.pasef {
                slot_scan(&mut pasef_arena, scan)?;
            }
        }
        sentinels.sort_by_key(|scan| scan.first_frame_id());

        publish_scans(ms1_arena, pasef_arena, sentinels)
    }

    /// MRM mode collects no MS1 frames: every triggered frame is one
    /// fragmentation event, reconstructed as a standalone MS2 scan over the
    /// frame's full mobility range. Frames without a FrameMsMsInfo row never
    /// triggered and produce no scan.
    fn load_mrm(
        &self,
        pool: &rayon::ThreadPool,
        merger: &TofSpectraMerger,
        num_threads: usize,
        filtering: Option<&FilteringParams>,
    ) -> Result<Vec<TimsDataScan>> {
        let frame_ids = &self.handle.frame_table.ids;
        let chunk_size = std::cmp::max(1, frame_ids.len().div_ceil(num_threads));

        let chunk_results: Vec<Result<Vec<TimsDataScan>>> = pool.install(|| {
            frame_ids
                .par_chunks(chunk_size)
                .map(|chunk| self.process_mrm_chunk(chunk, merger, filtering))
                .collect()
        });

        let mut arena: Vec<Option<TimsDataScan>> =
            (0..frame_ids.len()).map(|_| None).collect();
        for chunk in chunk_results {
            for scan in chunk? {
                let slot = scan.first_frame_id() - 1;
                if slot < 0 || slot as usize >= arena.len() {
                    return Err(TimsReaderError::Consistency(format!(
                        "frame id {} outside arena of {} slots",
                        scan.first_frame_id(),
                        arena.len()
                    )));
                }
                arena[slot as usize] = Some(scan);
            }
        }

        let mut published: Vec<TimsDataScan> = arena.into_iter().flatten().collect();
        for (index, scan) in published.iter_mut().enumerate() {
            scan.one_based_scan_number = Some(index as u32 + 1);
        }
        Ok(published)
    }

    fn process_mrm_chunk(
        &self,
        frame_ids: &[i64],
        merger: &TofSpectraMerger,
        filtering: Option<&FilteringParams>,
    ) -> Result<Vec<TimsDataScan>> {
        let conn = open_tdf_connection(self.data_path.to_str().ok_or_else(|| {
            TimsReaderError::Resource("data path is not valid UTF-8".to_string())
        })?)?;

        let mut scans = Vec::new();
        for &frame_id in frame_ids {
            if let Some(scan) = self.build_mrm_scan(&conn, frame_id, merger, filtering)? {
                scans.push(scan);
            }
        }
        Ok(scans)
    }

    fn build_mrm_scan(
        &self,
        conn: &Connection,
        frame_id: i64,
        merger: &TofSpectraMerger,
        filtering: Option<&FilteringParams>,
    ) -> Result<Option<TimsDataScan>> {
        let record = match read_mrm_record(conn, frame_id)? {
            Some(record) => record,
            None => return Ok(None),
        };

        let frame = self.handle.get_frame(frame_id)?;
        let components = collect_components(&frame, record.scan_start, record.scan_end)?;
        let total_ion_current = raw_ion_current(&components);
        let spectrum = merger.merge_to_spectrum(&components, 2, self.handle.mz_lookup(), filtering)?;
        if spectrum.is_empty() {
            debug!(frame_id, "empty MRM spectrum dropped");
            return Ok(None);
        }

        Ok(Some(self.make_mrm_scan(&record, spectrum, total_ion_current)?))
    }

    fn make_mrm_scan(
        &self,
        record: &MrmRecord,
        spectrum: MzSpectrum,
        total_ion_current: f64,
    ) -> Result<TimsDataScan> {
        let frame_id = record.frame_id;
        Ok(TimsDataScan {
            spectrum,
            ms_order: 2,
            is_centroid: true,
            polarity: self.handle.polarity(frame_id)?,
            retention_time: self.handle.retention_time(frame_id)?,
            total_ion_current,
            injection_time: self.handle.injection_time(frame_id)?,
            native_id: TimsDataScan::native_id_mrm(frame_id, record.scan_start, record.scan_end),
            scan_window: self.scan_window,
            frame_ids: vec![frame_id],
            scan_start: record.scan_start,
            scan_end: record.scan_end,
            median_one_over_k0: self
                .handle
                .one_over_k0((record.scan_start + record.scan_end) as f64 / 2.0)?,
            precursor_id: SENTINEL_PRECURSOR_ID,
            isolation_mz: Some(record.isolation_mz),
            isolation_width: Some(record.isolation_width),
            collision_energy: Some(record.collision_energy),
            selected_ion_mz: None,
            selected_ion_monoisotopic_mz: None,
            selected_ion_charge: None,
            selected_ion_intensity: None,
            dissociation_type: Some(DissociationType::Cid),
            one_based_scan_number: None,
            one_based_precursor_scan_number: None,
            components: Vec::new(),
        })
    }

    fn process_chunk(
        &self,
        frame_ids: &[i64],
        merger: &TofSpectraMerger,
        filtering: Option<&FilteringParams>,
    ) -> Result<ChunkScans> {
        let conn = open_tdf_connection(self.data_path.to_str().ok_or_else(|| {
            TimsReaderError::Resource("data path is not valid UTF-8".to_string())
        })?)?;

        let mut chunk = ChunkScans {
            ms1: Vec::new(),
            pasef: Vec::new(),
        };
        for &frame_id in frame_ids {
            self.process_ms1_frame(&conn, frame_id, merger, filtering, &mut chunk)?;
        }
        Ok(chunk)
    }

    /// Decode one MS1 frame, build the per-precursor MS1 scans, then build
    /// the merged MS2 scan for every precursor whose MS1 scan survived.
    fn process_ms1_frame(
        &self,
        conn: &Connection,
        frame_id: i64,
        merger: &TofSpectraMerger,
        filtering: Option<&FilteringParams>,
        chunk: &mut ChunkScans,
    ) -> Result<()> {
        let frame = self.handle.get_frame(frame_id)?;

        let mut records = read_ms1_records(conn, frame_id)?;
        if records.is_empty() {
            // No precursors were isolated out of this frame; emit a single
            // full-range scan carrying the sentinel precursor id.
            let num_scans = self.handle.frame_table.num_scans(frame_id)?;
            records.push(Ms1Record {
                precursor_id: SENTINEL_PRECURSOR_ID,
                scan_start: 1,
                scan_end: num_scans,
                scan_median: num_scans as f64,
            });
        }

        let mut surviving_precursors = Vec::with_capacity(records.len());
        for record in records {
            let components = collect_components(&frame, record.scan_start, record.scan_end)?;
            // TIC comes from the raw per-scan intensities, not the filtered
            // spectrum.
            let total_ion_current = raw_ion_current(&components);
            let spectrum =
                merger.merge_to_spectrum(&components, 1, self.handle.mz_lookup(), filtering)?;
            if spectrum.is_empty() {
                // Dropping the MS1 scan also suppresses the precursor's MS2
                // scan, which would otherwise have nothing to link back to.
                debug!(frame_id, precursor_id = record.precursor_id, "empty MS1 spectrum dropped");
                continue;
            }
            if record.precursor_id != SENTINEL_PRECURSOR_ID {
                surviving_precursors.push(record.precursor_id);
            }
            chunk
                .ms1
                .push(self.make_ms1_scan(frame_id, &record, spectrum, total_ion_current)?);
        }

        self.build_pasef_scans(conn, &surviving_precursors, merger, filtering, chunk)
    }

    fn make_ms1_scan(
        &self,
        frame_id: i64,
        record: &Ms1Record,
        spectrum: MzSpectrum,
        total_ion_current: f64,
    ) -> Result<TimsDataScan> {
        Ok(TimsDataScan {
            spectrum,
            ms_order: 1,
            is_centroid: true,
            polarity: self.handle.polarity(frame_id)?,
            retention_time: self.handle.retention_time(frame_id)?,
            total_ion_current,
            injection_time: self.handle.injection_time(frame_id)?,
            native_id: TimsDataScan::native_id_ms1(
                frame_id,
                record.scan_start,
                record.scan_end,
                record.precursor_id,
            ),
            scan_window: self.scan_window,
            frame_ids: vec![frame_id],
            scan_start: record.scan_start,
            scan_end: record.scan_end,
            median_one_over_k0: self.handle.one_over_k0(record.scan_median)?,
            precursor_id: record.precursor_id,
            isolation_mz: None,
            isolation_width: None,
            collision_energy: None,
            selected_ion_mz: None,
            selected_ion_monoisotopic_mz: None,
            selected_ion_charge: None,
            selected_ion_intensity: None,
            dissociation_type: None,
            one_based_scan_number: None,
            one_based_precursor_scan_number: None,
            components: Vec::new(),
        })
    }

    /// Build the merged fragmentation scan of each precursor: metadata
    /// shells first, then every distinct PASEF frame of the batch is decoded
    /// exactly once and its contribution merged into the shells that cover
    /// it, and finally each shell collapses its components into a spectrum.
    fn build_pasef_scans(
        &self,
        conn: &Connection,
        precursor_ids: &[i64],
        merger: &TofSpectraMerger,
        filtering: Option<&FilteringParams>,
        chunk: &mut ChunkScans,
    ) -> Result<()> {
        let records = read_pasef_records(conn, precursor_ids)?;
        if records.is_empty() {
            return Ok(());
        }

        let mut all_frames: BTreeSet<i64> = BTreeSet::new();
        let mut shells = Vec::with_capacity(records.len());
        for record in &records {
            all_frames.extend(record.frame_ids.iter().copied());
            shells.push(self.make_pasef_shell(record)?);
        }

        for &frame_id in &all_frames {
            let frame = self.handle.get_frame(frame_id)?;
            for shell in shells
                .iter_mut()
                .filter(|shell| shell.frame_ids.contains(&frame_id))
            {
                let components = collect_components(&frame, shell.scan_start, shell.scan_end)?;
                let (indices, intensities) = TofSpectraMerger::merge_components(&components);
                shell.add_component(indices, intensities);
            }
        }

        for mut shell in shells {
            shell.sum_components(merger, self.handle.mz_lookup(), filtering)?;
            if shell.spectrum.is_empty() {
                debug!(
                    precursor_id = shell.precursor_id,
                    "empty MS2 spectrum dropped"
                );
                continue;
            }
            chunk.pasef.push(shell);
        }
        Ok(())
    }

    fn make_pasef_shell(&self, record: &PasefRecord) -> Result<TimsDataScan> {
        let first_frame = record.frame_ids[0];
        let last_frame = *record.frame_ids.last().unwrap_or(&first_frame);
        Ok(TimsDataScan {
            spectrum: MzSpectrum::default(),
            ms_order: 2,
            is_centroid: true,
            polarity: self.handle.polarity(first_frame)?,
            retention_time: self.handle.retention_time(first_frame)?,
            total_ion_current: 0.0,
            injection_time: self.handle.injection_time_sum(first_frame, last_frame)?,
            native_id: TimsDataScan::native_id_ms2(
                first_frame,
                last_frame,
                record.scan_start,
                record.scan_end,
            ),
            scan_window: self.scan_window,
            frame_ids: record.frame_ids.clone(),
            scan_start: record.scan_start,
            scan_end: record.scan_end,
            median_one_over_k0: self.handle.one_over_k0(record.scan_median)?,
            precursor_id: record.precursor_id,
            isolation_mz: Some(record.isolation_mz),
            isolation_width: Some(record.isolation_width),
            collision_energy: Some(record.collision_energy),
            selected_ion_mz: Some(record.most_abundant_mz),
            selected_ion_monoisotopic_mz: Some(record.monoisotopic_mz),
            selected_ion_charge: Some(record.charge),
            selected_ion_intensity: Some(record.intensity),
            dissociation_type: Some(DissociationType::Cid),
            one_based_scan_number: None,
            one_based_precursor_scan_number: None,
            components: Vec::new(),
        })
    }
}

fn d_path_buf(data_path: &str) -> PathBuf {
    Path::new(data_path).to_path_buf()
}

/// Gather the (TOF index, intensity) arrays of the one-based mobility scan
/// range `[scan_start, scan_end)` of a decoded frame. Intensities widen to
/// u64 so downstream summing cannot overflow.
fn collect_components(
    frame: &FrameProxy,
    scan_start: i64,
    scan_end: i64,
) -> Result<Vec<(Vec<u32>, Vec<u64>)>> {
    let mut components = Vec::new();
    for scan in scan_start.max(1)..scan_end {
        let zero_indexed = (scan - 1) as usize;
        let indices = frame.scan_indices(zero_indexed)?.to_vec();
        let intensities: Vec<u64> = frame
            .scan_intensities(zero_indexed)?
            .iter()
            .map(|&i| i as u64)
            .collect();
        components.push((indices, intensities));
    }
    Ok(components)
}

fn slot_scan(arena: &mut [Option<TimsDataScan>], scan: TimsDataScan) -> Result<()> {
    let slot = scan.precursor_id - 1;
    if slot < 0 || slot as usize >= arena.len() {
        return Err(TimsReaderError::Consistency(format!(
            "precursor id {} outside arena of {} slots",
            scan.precursor_id,
            arena.len()
        )));
    }
    let slot = slot as usize;
    if arena[slot].is_some() {
        return Err(TimsReaderError::Consistency(format!(
            "two scans produced for precursor id {}",
            scan.precursor_id
        )));
    }
    arena[slot] = Some(scan);
    Ok(())
}

/// The single-threaded publication pass: assigns gapless one-based scan
/// numbers with each MS2 scan placed directly after its precursor's MS1 scan
/// and back-referencing its number. Sentinel MS1 scans interleave by frame
/// id; the leftovers flush after the last precursor scan. An MS2 scan whose
/// MS1 scan never appears is a consistency error.
fn publish_scans(
    ms1_arena: Vec<Option<TimsDataScan>>,
    pasef_arena: Vec<Option<TimsDataScan>>,
    sentinels: Vec<TimsDataScan>,
) -> Result<Vec<TimsDataScan>> {
    let mut ms1_scans: Vec<TimsDataScan> = ms1_arena.into_iter().flatten().collect();
    ms1_scans.sort_by_key(|scan| (scan.first_frame_id(), scan.precursor_id));
    // arena order is precursor id order already
    let pasef_scans: Vec<TimsDataScan> = pasef_arena.into_iter().flatten().collect();

    let mut published = Vec::with_capacity(ms1_scans.len() * 2 + sentinels.len());
    let mut sentinel_iter = sentinels.into_iter().peekable();
    let mut pasef_iter = pasef_scans.into_iter().peekable();
    let mut next_number = 1u32;

    for mut ms1 in ms1_scans {
        while let Some(mut sentinel) =
            sentinel_iter.next_if(|s| s.first_frame_id() < ms1.first_frame_id())
        {
            sentinel.one_based_scan_number = Some(next_number);
            next_number += 1;
            published.push(sentinel);
        }

        ms1.one_based_scan_number = Some(next_number);
        let ms1_number = next_number;
        next_number += 1;
        let ms1_precursor_id = ms1.precursor_id;
        published.push(ms1);

        if let Some(orphan) = pasef_iter.peek() {
            if orphan.precursor_id < ms1_precursor_id {
                return Err(TimsReaderError::Consistency(format!(
                    "MS2 scan for precursor {} has no matching MS1 scan",
                    orphan.precursor_id
                )));
            }
        }
        if let Some(mut pasef) = pasef_iter.next_if(|p| p.precursor_id == ms1_precursor_id) {
            pasef.one_based_precursor_scan_number = Some(ms1_number);
            pasef.one_based_scan_number = Some(next_number);
            next_number += 1;
            published.push(pasef);
        }
    }

    for mut sentinel in sentinel_iter {
        sentinel.one_based_scan_number = Some(next_number);
        next_number += 1;
        published.push(sentinel);
    }

    if let Some(pasef) = pasef_iter.next() {
        return Err(TimsReaderError::Consistency(format!(
            "MS2 scan for precursor {} has no matching MS1 scan",
            pasef.precursor_id
        )));
    }

    Ok(published)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};

    use tofcore::data::spectrum::Polarity;

    use crate::data::handle::tests::FakeRawSource;
    use crate::data::meta::tests::create_test_schema;

    static TEST_DIR_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn make_test_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "timsreader-dda-test-{}-{}",
            std::process::id(),
            TEST_DIR_COUNTER.fetch_add(1, Ordering::SeqCst)
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// A small DDA-PASEF run: frame 1 is an MS1 frame with two precursors,
    /// frames 2 and 3 are the PASEF frames that fragmented them, and frame 4
    /// is an MS1 frame in which nothing was isolated.
    fn write_test_tdf(dir: &Path) {
        let conn = Connection::open(dir.join("analysis.tdf")).unwrap();
        create_test_schema(&conn);
        conn.execute_batch(
            "INSERT INTO GlobalMetadata VALUES ('DigitizerNumSamples', '1000');
             INSERT INTO GlobalMetadata VALUES ('MzAcqRangeLower', '100.0');
             INSERT INTO GlobalMetadata VALUES ('MzAcqRangeUpper', '1700.0');
             INSERT INTO Frames VALUES (1, 60.0, '+', 8, 0, 4, 5, 120.0, 100.0);
             INSERT INTO Frames VALUES (2, 61.0, '+', 8, 8, 4, 3, 112.0, 100.0);
             INSERT INTO Frames VALUES (3, 62.0, '+', 8, 8, 4, 2, 14.0, 100.0);
             INSERT INTO Frames VALUES (4, 63.0, '+', 8, 0, 4, 1, 20.0, 100.0);
             INSERT INTO Precursors VALUES (1, 1000.0, 1000.0, 999.5, 2, 2.0, 500.0, 1);
             INSERT INTO Precursors VALUES (2, 1200.0, 1200.0, NULL, NULL, 3.5, 300.0, 1);
             INSERT INTO PasefFrameMsMsInfo VALUES (2, 1, 3, 1000.5, 2.0, 30.0, 1);
             INSERT INTO PasefFrameMsMsInfo VALUES (3, 1, 3, 1000.5, 2.0, 30.0, 1);
             INSERT INTO PasefFrameMsMsInfo VALUES (2, 2, 4, 1200.5, 2.0, 35.0, 2);",
        )
        .unwrap();
    }

    fn test_source() -> FakeRawSource {
        FakeRawSource {
            payloads: vec![
                // frame 1 (MS1): scans [100,200]/[10,20], [100,300]/[10,30], [150]/[50], []
                (1, vec![2, 2, 1, 0, 100, 200, 10, 20, 100, 300, 10, 30, 150, 50]),
                // frame 2 (PASEF): scans [500]/[5], [500]/[7], [600]/[100], []
                (2, vec![1, 1, 1, 0, 500, 5, 500, 7, 600, 100]),
                // frame 3 (PASEF): scans [500]/[5], [502]/[9], [], []
                (3, vec![1, 1, 0, 0, 500, 5, 502, 9]),
                // frame 4 (MS1, no precursors): scan [90,100]/[10,20], rest
                // empty. Median intensity 15 matches frame 1, so the cached
                // MS1 noise floor is the same no matter which frame a worker
                // decodes first.
                (4, vec![2, 0, 0, 0, 90, 100, 10, 20]),
            ],
        }
    }

    fn open_test_reader(dir: &Path) -> TimsTofReader {
        TimsTofReader::from_source(dir.to_str().unwrap(), Box::new(test_source())).unwrap()
    }

    #[test]
    fn test_load_publishes_numbered_scan_sequence() {
        let dir = make_test_dir();
        write_test_tdf(&dir);
        let reader = open_test_reader(&dir);
        assert_eq!(reader.scan_mode(), ScanMode::Pasef);
        assert_eq!(reader.num_ms1_frames(), 2);

        let scans = reader.load(1, None).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        // MS1(p1), MS2(p1), MS1(p2), MS2(p2), then the precursor-free MS1
        assert_eq!(scans.len(), 5);
        let numbers: Vec<u32> = scans
            .iter()
            .map(|s| s.one_based_scan_number.unwrap())
            .collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);

        assert_eq!(scans[0].ms_order, 1);
        assert_eq!(scans[0].precursor_id, 1);
        assert_eq!(scans[0].native_id, "frame=1;scans=1-3;precursor=1");
        assert_eq!(scans[0].polarity, Polarity::Positive);
        assert!((scans[0].retention_time - 1.0).abs() < 1e-9);
        assert!((scans[0].median_one_over_k0 - 1.9).abs() < 1e-9);

        assert_eq!(scans[1].ms_order, 2);
        assert_eq!(scans[1].precursor_id, 1);
        assert_eq!(scans[1].one_based_precursor_scan_number, Some(1));
        assert_eq!(scans[1].native_id, "frames=2-3;scans=1-3");
        assert_eq!(scans[1].frame_ids, vec![2, 3]);
        assert!((scans[1].injection_time - 200.0).abs() < 1e-9);
        assert_eq!(scans[1].dissociation_type, Some(DissociationType::Cid));
        assert_eq!(scans[1].selected_ion_charge, Some(2));

        assert_eq!(scans[2].ms_order, 1);
        assert_eq!(scans[2].precursor_id, 2);
        assert_eq!(scans[3].ms_order, 2);
        assert_eq!(scans[3].precursor_id, 2);
        assert_eq!(scans[3].one_based_precursor_scan_number, Some(3));
        // NULL monoisotopic m/z and charge fall back to isolation m/z and 1
        assert_eq!(scans[3].selected_ion_monoisotopic_mz, Some(1200.5));
        assert_eq!(scans[3].selected_ion_charge, Some(1));
        // fractional apex scan interpolates the mobility table
        assert!((scans[3].median_one_over_k0 - 1.75).abs() < 1e-9);

        assert!(scans[4].is_sentinel());
        assert_eq!(scans[4].ms_order, 1);
        assert_eq!(scans[4].native_id, "frame=4;scans=1-4;precursor=-1");
    }

    #[test]
    fn test_load_spectra_are_merged_and_centroided() {
        let dir = make_test_dir();
        write_test_tdf(&dir);
        let reader = open_test_reader(&dir);
        let scans = reader.load(1, None).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        // Precursor 1 MS1: merged intensities [10, 10, 20, 30] give a noise
        // floor of 15; collapsed peaks (100,20) (200,20) (300,30) all survive.
        // The fake source maps index i to m/z 2i.
        let ms1 = &scans[0];
        assert_eq!(ms1.spectrum.mz, vec![200.0, 400.0, 600.0]);
        assert_eq!(ms1.spectrum.intensity, vec![20.0, 20.0, 30.0]);
        assert!((ms1.total_ion_current - 70.0).abs() < 1e-9);

        // Precursor 1 MS2 over frames 2+3: merged intensities [5, 7, 5, 9]
        // give an MS2 floor of 6; collapsed (500,17) and (502,9) both pass
        // and chain into one centroid.
        let ms2 = &scans[1];
        assert_eq!(ms2.spectrum.len(), 1);
        let expected_mz = (1000.0 * 17.0 + 1004.0 * 9.0) / 26.0;
        assert!((ms2.spectrum.mz[0] - expected_mz).abs() < 1e-9);
        assert!((ms2.spectrum.intensity[0] - 26.0).abs() < 1e-9);
        assert!((ms2.total_ion_current - 26.0).abs() < 1e-9);

        // Precursor 2 MS1 uses the cached floor of 15, which drops the
        // (100,10) entry of scans 2..4. The TIC still counts the dropped
        // peak: it is the raw intensity sum, not the filtered one.
        let ms1_p2 = &scans[2];
        assert_eq!(ms1_p2.spectrum.mz, vec![300.0, 600.0]);
        assert_eq!(ms1_p2.spectrum.intensity, vec![50.0, 30.0]);
        assert!((ms1_p2.total_ion_current - 90.0).abs() < 1e-9);

        // Same for the precursor-free frame: raw 10+20 even though the
        // (90,10) entry falls below the floor.
        let sentinel = &scans[4];
        assert_eq!(sentinel.spectrum.intensity, vec![20.0]);
        assert!((sentinel.total_ion_current - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_load_is_deterministic_across_thread_counts() {
        let dir = make_test_dir();
        write_test_tdf(&dir);
        let reader = open_test_reader(&dir);
        let single = reader.load(1, None).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        let dir = make_test_dir();
        write_test_tdf(&dir);
        let reader = open_test_reader(&dir);
        let multi = reader.load(4, None).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        let ids: Vec<&str> = single.iter().map(|s| s.native_id.as_str()).collect();
        let other: Vec<&str> = multi.iter().map(|s| s.native_id.as_str()).collect();
        assert_eq!(ids, other);
    }

    #[test]
    fn test_open_rejects_unsupported_scan_mode() {
        let dir = make_test_dir();
        let conn = Connection::open(dir.join("analysis.tdf")).unwrap();
        create_test_schema(&conn);
        conn.execute_batch(
            "INSERT INTO GlobalMetadata VALUES ('DigitizerNumSamples', '10');
             INSERT INTO GlobalMetadata VALUES ('MzAcqRangeLower', '100.0');
             INSERT INTO GlobalMetadata VALUES ('MzAcqRangeUpper', '1700.0');
             INSERT INTO Frames VALUES (1, 1.0, '+', 9, 0, 4, 0, 0.0, 100.0);",
        )
        .unwrap();
        drop(conn);

        let result = TimsTofReader::from_source(
            dir.to_str().unwrap(),
            Box::new(FakeRawSource { payloads: vec![] }),
        );
        std::fs::remove_dir_all(&dir).unwrap();
        assert!(matches!(
            result,
            Err(TimsReaderError::UnsupportedScanMode(9))
        ));
    }

    /// An MRM run: three fragmentation frames, the second of which never
    /// triggered and has no FrameMsMsInfo row.
    fn write_mrm_tdf(dir: &Path) {
        let conn = Connection::open(dir.join("analysis.tdf")).unwrap();
        create_test_schema(&conn);
        conn.execute_batch(
            "INSERT INTO GlobalMetadata VALUES ('DigitizerNumSamples', '1000');
             INSERT INTO GlobalMetadata VALUES ('MzAcqRangeLower', '100.0');
             INSERT INTO GlobalMetadata VALUES ('MzAcqRangeUpper', '1700.0');
             INSERT INTO Frames VALUES (1, 60.0, '+', 2, 2, 4, 2, 14.0, 50.0);
             INSERT INTO Frames VALUES (2, 61.0, '+', 2, 2, 4, 0, 0.0, 50.0);
             INSERT INTO Frames VALUES (3, 62.0, '+', 2, 2, 4, 2, 23.0, 50.0);
             INSERT INTO FrameMsMsInfo VALUES (1, 622.5, 3.0, 1, 27.0);
             INSERT INTO FrameMsMsInfo VALUES (3, 700.5, 3.0, 1, 30.0);",
        )
        .unwrap();
    }

    #[test]
    fn test_load_mrm_builds_one_scan_per_triggered_frame() {
        let dir = make_test_dir();
        write_mrm_tdf(&dir);
        let reader = TimsTofReader::from_source(
            dir.to_str().unwrap(),
            Box::new(FakeRawSource {
                payloads: vec![
                    // frame 1: scans [400]/[8], [400]/[6], rest empty
                    (1, vec![1, 1, 0, 0, 400, 8, 400, 6]),
                    // frame 3: scan [100,500]/[3,20], rest empty
                    (3, vec![2, 0, 0, 0, 100, 500, 3, 20]),
                ],
            }),
        )
        .unwrap();
        assert_eq!(reader.scan_mode(), ScanMode::Mrm);
        assert_eq!(reader.num_ms1_frames(), 0);

        let scans = reader.load(1, None).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        // the untriggered frame 2 yields nothing and numbering stays gapless
        assert_eq!(scans.len(), 2);
        assert_eq!(scans[0].one_based_scan_number, Some(1));
        assert_eq!(scans[1].one_based_scan_number, Some(2));

        let first = &scans[0];
        assert_eq!(first.ms_order, 2);
        assert_eq!(first.native_id, "frame=1;scans=1-4");
        assert_eq!(first.isolation_mz, Some(622.5));
        assert_eq!(first.collision_energy, Some(27.0));
        assert_eq!(first.dissociation_type, Some(DissociationType::Cid));
        assert_eq!(first.precursor_id, SENTINEL_PRECURSOR_ID);
        assert_eq!(first.one_based_precursor_scan_number, None);
        // merged [8, 6] at index 400, MS2 floor = 7, collapsed sum survives
        assert_eq!(first.spectrum.mz, vec![800.0]);
        assert_eq!(first.spectrum.intensity, vec![14.0]);
        assert!((first.total_ion_current - 14.0).abs() < 1e-9);
        // full-range midpoint (1+4)/2 interpolates the mobility table
        assert!((first.median_one_over_k0 - 1.85).abs() < 1e-9);

        let second = &scans[1];
        assert_eq!(second.native_id, "frame=3;scans=1-4");
        // the cached floor of 7 drops the (100,3) entry; TIC still counts it
        assert_eq!(second.spectrum.mz, vec![1000.0]);
        assert_eq!(second.spectrum.intensity, vec![20.0]);
        assert!((second.total_ion_current - 23.0).abs() < 1e-9);
    }

    fn bare_scan(ms_order: u8, frame_id: i64, precursor_id: i64) -> TimsDataScan {
        TimsDataScan {
            spectrum: MzSpectrum::new(vec![100.0], vec![1.0]),
            ms_order,
            is_centroid: true,
            polarity: Polarity::Positive,
            retention_time: 1.0,
            total_ion_current: 1.0,
            injection_time: 100.0,
            native_id: String::new(),
            scan_window: MzRange::new(100.0, 1700.0),
            frame_ids: vec![frame_id],
            scan_start: 1,
            scan_end: 2,
            median_one_over_k0: 1.0,
            precursor_id,
            isolation_mz: None,
            isolation_width: None,
            collision_energy: None,
            selected_ion_mz: None,
            selected_ion_monoisotopic_mz: None,
            selected_ion_charge: None,
            selected_ion_intensity: None,
            dissociation_type: None,
            one_based_scan_number: None,
            one_based_precursor_scan_number: None,
            components: Vec::new(),
        }
    }

    #[test]
    fn test_publish_rejects_orphan_ms2() {
        let ms1_arena = vec![Some(bare_scan(1, 1, 1)), None];
        let pasef_arena = vec![Some(bare_scan(2, 2, 1)), Some(bare_scan(2, 2, 2))];

        let result = publish_scans(ms1_arena, pasef_arena, Vec::new());
        assert!(matches!(result, Err(TimsReaderError::Consistency(_))));
    }

    #[test]
    fn test_publish_allows_ms1_without_ms2() {
        let ms1_arena = vec![Some(bare_scan(1, 1, 1)), Some(bare_scan(1, 1, 2))];
        let pasef_arena = vec![None, Some(bare_scan(2, 2, 2))];

        let scans = publish_scans(ms1_arena, pasef_arena, Vec::new()).unwrap();
        assert_eq!(scans.len(), 3);
        assert_eq!(scans[0].precursor_id, 1);
        assert_eq!(scans[1].precursor_id, 2);
        assert_eq!(scans[2].ms_order, 2);
        assert_eq!(scans[2].one_based_precursor_scan_number, Some(2));
    }
}
