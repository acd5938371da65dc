use rusqlite::Connection;
use std::path::Path;

use crate::data::acquisition::MsMsType;
use crate::error::{Result, TimsReaderError};

/// Open the `analysis.tdf` SQLite database inside a `.d` directory.
pub fn open_tdf_connection(bruker_d_folder_name: &str) -> Result<Connection> {
    let db_path = Path::new(bruker_d_folder_name).join("analysis.tdf");
    Ok(Connection::open(db_path)?)
}

/// Columnar copy of the Frames table, indexed by `frame_id - 1`. Loaded once
/// per file and shared read-only across workers.
#[derive(Debug, Clone, Default)]
pub struct FrameTable {
    pub ids: Vec<i64>,
    pub times: Vec<f64>,
    pub polarities: Vec<String>,
    pub scan_modes: Vec<i64>,
    pub ms_ms_types: Vec<MsMsType>,
    pub num_scans: Vec<i64>,
    pub num_peaks: Vec<i64>,
    pub summed_intensities: Vec<f64>,
    pub accumulation_times: Vec<f64>,
}

impl FrameTable {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn row(&self, frame_id: i64) -> Result<usize> {
        let idx = frame_id - 1;
        if idx < 0 || idx as usize >= self.ids.len() {
            return Err(TimsReaderError::Consistency(format!(
                "frame id {} not present in the Frames table ({} rows)",
                frame_id,
                self.ids.len()
            )));
        }
        Ok(idx as usize)
    }

    pub fn num_scans(&self, frame_id: i64) -> Result<i64> {
        Ok(self.num_scans[self.row(frame_id)?])
    }

    pub fn polarity(&self, frame_id: i64) -> Result<&str> {
        Ok(self.polarities[self.row(frame_id)?].as_str())
    }

    /// Retention time in seconds, as stored in the Time column.
    pub fn time(&self, frame_id: i64) -> Result<f64> {
        Ok(self.times[self.row(frame_id)?])
    }

    pub fn accumulation_time(&self, frame_id: i64) -> Result<f64> {
        Ok(self.accumulation_times[self.row(frame_id)?])
    }

    pub fn ms_ms_type(&self, frame_id: i64) -> Result<MsMsType> {
        Ok(self.ms_ms_types[self.row(frame_id)?])
    }

    /// Ids of all precursor (MS1) frames, ascending.
    pub fn ms1_frame_ids(&self) -> Vec<i64> {
        self.ids
            .iter()
            .zip(&self.ms_ms_types)
            .filter(|(_, ms_ms_type)| **ms_ms_type == MsMsType::Precursor)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn summed_intensity(&self, frame_id: i64) -> Result<f64> {
        Ok(self.summed_intensities[self.row(frame_id)?])
    }

    /// Frame id of the median row, used to build the global calibration
    /// lookup tables.
    pub fn median_frame_id(&self) -> Result<i64> {
        if self.ids.is_empty() {
            return Err(TimsReaderError::Consistency(
                "Frames table is empty".to_string(),
            ));
        }
        Ok(self.ids[self.ids.len() / 2])
    }

    pub fn max_num_scans(&self) -> i64 {
        self.num_scans.iter().copied().max().unwrap_or(0)
    }
}

/// One precursor isolated during an MS1 frame, built from the
/// `Precursors ⋈ PasefFrameMsMsInfo` GROUP BY query. `scan_median` is the
/// (fractional) apex mobility scan reported in Precursors.ScanNumber.
#[derive(Debug, Clone)]
pub struct Ms1Record {
    pub precursor_id: i64,
    pub scan_start: i64,
    pub scan_end: i64,
    pub scan_median: f64,
}

/// One precursor's fragmentation metadata, aggregated across all PASEF
/// frames that sampled it.
#[derive(Debug, Clone)]
pub struct PasefRecord {
    pub frame_ids: Vec<i64>,
    pub precursor_id: i64,
    pub scan_start: i64,
    pub scan_end: i64,
    pub scan_median: f64,
    pub isolation_mz: f64,
    pub isolation_width: f64,
    pub collision_energy: f64,
    pub most_abundant_mz: f64,
    pub monoisotopic_mz: f64,
    pub charge: i64,
    pub intensity: f64,
}

/// Isolation metadata of one MRM fragmentation frame, covering the frame's
/// full mobility scan range.
#[derive(Debug, Clone)]
pub struct MrmRecord {
    pub frame_id: i64,
    pub scan_start: i64,
    pub scan_end: i64,
    pub isolation_mz: f64,
    pub isolation_width: f64,
    pub collision_energy: f64,
}

pub fn read_frame_table(conn: &Connection) -> Result<FrameTable> {
    let columns = [
        "Id",
        "Time",
        "Polarity",
        "ScanMode",
        "MsMsType",
        "NumScans",
        "NumPeaks",
        "SummedIntensities",
        "AccumulationTime",
    ];
    let query = format!("SELECT {} FROM Frames ORDER BY Id", columns.join(", "));

    let mut table = FrameTable::default();
    let mut stmt = conn.prepare(&query)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        table.ids.push(row.get(0)?);
        table.times.push(row.get(1)?);
        table.polarities.push(row.get(2)?);
        table.scan_modes.push(row.get(3)?);
        table.ms_ms_types.push(MsMsType::from(row.get::<_, i64>(4)?));
        table.num_scans.push(row.get(5)?);
        table.num_peaks.push(row.get(6)?);
        table.summed_intensities.push(row.get(7)?);
        table.accumulation_times.push(row.get(8)?);
    }
    Ok(table)
}

pub fn read_distinct_scan_modes(conn: &Connection) -> Result<Vec<i64>> {
    let rows: std::result::Result<Vec<i64>, _> = conn
        .prepare("SELECT DISTINCT ScanMode FROM Frames")?
        .query_map([], |row| row.get(0))?
        .collect();
    Ok(rows?)
}

/// Highest precursor id in the file, 0 when the Precursors table is empty.
/// Precursor ids are dense from 1, so this sizes the scan arenas.
pub fn read_max_precursor_id(conn: &Connection) -> Result<i64> {
    let max: Option<i64> = conn.query_row("SELECT MAX(Id) FROM Precursors", [], |row| row.get(0))?;
    Ok(max.unwrap_or(0))
}

/// The acquisition m/z range, from the MzAcqRangeLower/Upper metadata keys.
pub fn read_mz_acquisition_range(conn: &Connection) -> Result<(f64, f64)> {
    let get = |key: &str| -> Result<f64> {
        let value: String = conn.query_row(
            "SELECT Value FROM GlobalMetadata WHERE Key = ?1",
            [key],
            |row| row.get(0),
        )?;
        value.parse::<f64>().map_err(|_| {
            TimsReaderError::Consistency(format!("{} is not a number: {}", key, value))
        })
    };
    Ok((get("MzAcqRangeLower")?, get("MzAcqRangeUpper")?))
}

pub fn read_digitizer_num_samples(conn: &Connection) -> Result<i64> {
    let value: String = conn.query_row(
        "SELECT Value FROM GlobalMetadata WHERE Key = 'DigitizerNumSamples'",
        [],
        |row| row.get(0),
    )?;
    value.parse::<i64>().map_err(|_| {
        TimsReaderError::Consistency(format!(
            "DigitizerNumSamples is not an integer: {}",
            value
        ))
    })
}

/// All precursors isolated out of the MS1 frame `frame_id`, one record per
/// precursor with the union of the mobility scan ranges its PASEF frames
/// covered. Zero rows means no precursors were sampled from this frame; the
/// caller synthesizes a full-range sentinel record with precursor id -1.
pub fn read_ms1_records(conn: &Connection, frame_id: i64) -> Result<Vec<Ms1Record>> {
    let query = "SELECT MIN(m.ScanNumBegin), MAX(m.ScanNumEnd), p.ScanNumber, p.Id \
         FROM Precursors p \
         INNER JOIN PasefFrameMsMsInfo m ON m.Precursor = p.Id \
         WHERE p.Parent = ?1 \
         GROUP BY p.Id \
         ORDER BY p.Id";
    let rows: std::result::Result<Vec<Ms1Record>, _> = conn
        .prepare(query)?
        .query_map([frame_id], |row| {
            Ok(Ms1Record {
                scan_start: row.get(0)?,
                scan_end: row.get(1)?,
                scan_median: row.get(2)?,
                precursor_id: row.get(3)?,
            })
        })?
        .collect();
    Ok(rows?)
}

/// Fragmentation metadata for each of the given precursors, aggregated over
/// every PASEF frame that sampled the precursor. NULL monoisotopic m/z falls
/// back to the isolation m/z, NULL charge to 1.
pub fn read_pasef_records(conn: &Connection, precursor_ids: &[i64]) -> Result<Vec<PasefRecord>> {
    if precursor_ids.is_empty() {
        return Ok(Vec::new());
    }
    let id_list = precursor_ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let query = format!(
        "SELECT GROUP_CONCAT(m.Frame), MIN(m.ScanNumBegin), MAX(m.ScanNumEnd), m.IsolationMz, \
         m.IsolationWidth, m.CollisionEnergy, p.LargestPeakMz, p.MonoisotopicMz, p.Charge, \
         p.Intensity, p.ScanNumber, p.Id \
         FROM PasefFrameMsMsInfo m \
         INNER JOIN Precursors p ON m.Precursor = p.Id \
         WHERE m.Precursor IN ({}) \
         GROUP BY m.Precursor \
         ORDER BY p.Id",
        id_list
    );

    struct RawRecord {
        frames: String,
        record: PasefRecord,
    }

    let rows: std::result::Result<Vec<RawRecord>, _> = conn
        .prepare(&query)?
        .query_map([], |row| {
            let isolation_mz: f64 = row.get(3)?;
            Ok(RawRecord {
                frames: row.get(0)?,
                record: PasefRecord {
                    frame_ids: Vec::new(),
                    scan_start: row.get(1)?,
                    scan_end: row.get(2)?,
                    isolation_mz,
                    isolation_width: row.get(4)?,
                    collision_energy: row.get(5)?,
                    most_abundant_mz: row.get(6)?,
                    monoisotopic_mz: row.get::<_, Option<f64>>(7)?.unwrap_or(isolation_mz),
                    charge: row.get::<_, Option<i64>>(8)?.unwrap_or(1),
                    intensity: row.get(9)?,
                    scan_median: row.get(10)?,
                    precursor_id: row.get(11)?,
                },
            })
        })?
        .collect();

    let mut records = Vec::new();
    for raw in rows? {
        let mut record = raw.record;
        for part in raw.frames.split(',') {
            let frame_id = part.parse::<i64>().map_err(|_| {
                TimsReaderError::Consistency(format!(
                    "malformed frame list for precursor {}: {}",
                    record.precursor_id, raw.frames
                ))
            })?;
            record.frame_ids.push(frame_id);
        }
        record.frame_ids.sort_unstable();
        records.push(record);
    }
    Ok(records)
}

/// MRM isolation metadata for one frame, `None` for frames without a
/// FrameMsMsInfo row (inclusion-list entries that never triggered).
pub fn read_mrm_record(conn: &Connection, frame_id: i64) -> Result<Option<MrmRecord>> {
    let query = "SELECT f.NumScans, m.TriggerMass, m.IsolationWidth, m.CollisionEnergy \
         FROM Frames f \
         INNER JOIN FrameMsMsInfo m ON m.Frame = f.Id \
         WHERE f.Id = ?1";
    let mut stmt = conn.prepare(query)?;
    let mut rows = stmt.query([frame_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(MrmRecord {
            frame_id,
            scan_start: 1,
            scan_end: row.get(0)?,
            isolation_mz: row.get(1)?,
            isolation_width: row.get(2)?,
            collision_energy: row.get(3)?,
        })),
        None => Ok(None),
    }
}
