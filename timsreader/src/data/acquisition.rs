use std::fmt::Display;

/// The "ScanMode" column of the Frames table. Only PASEF and MRM data are
/// supported for spectrum reconstruction; every other mode is rejected up
/// front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Ms,
    AutoMsMs,
    Mrm,
    InSourceCid,
    BroadbandCid,
    Pasef,
    Dia,
    Prm,
    Maldi,
    Unknown,
}

impl ScanMode {
    pub fn to_i64(&self) -> i64 {
        match self {
            ScanMode::Ms => 0,
            ScanMode::AutoMsMs => 1,
            ScanMode::Mrm => 2,
            ScanMode::InSourceCid => 3,
            ScanMode::BroadbandCid => 4,
            ScanMode::Pasef => 8,
            ScanMode::Dia => 9,
            ScanMode::Prm => 10,
            ScanMode::Maldi => 20,
            ScanMode::Unknown => -1,
        }
    }
}

impl From<i64> for ScanMode {
    fn from(item: i64) -> Self {
        match item {
            0 => ScanMode::Ms,
            1 => ScanMode::AutoMsMs,
            2 => ScanMode::Mrm,
            3 => ScanMode::InSourceCid,
            4 => ScanMode::BroadbandCid,
            8 => ScanMode::Pasef,
            9 => ScanMode::Dia,
            10 => ScanMode::Prm,
            20 => ScanMode::Maldi,
            _ => ScanMode::Unknown,
        }
    }
}

impl Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanMode::Ms => write!(f, "MS"),
            ScanMode::AutoMsMs => write!(f, "AutoMsMs"),
            ScanMode::Mrm => write!(f, "MRM"),
            ScanMode::InSourceCid => write!(f, "InSourceCID"),
            ScanMode::BroadbandCid => write!(f, "BroadbandCID"),
            ScanMode::Pasef => write!(f, "PASEF"),
            ScanMode::Dia => write!(f, "DIA"),
            ScanMode::Prm => write!(f, "PRM"),
            ScanMode::Maldi => write!(f, "MALDI"),
            ScanMode::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// The "MsMsType" column of the Frames table: 0 marks a precursor (MS1)
/// frame, 2 an MRM fragmentation frame, 8 a PASEF fragmentation frame,
/// 9 a DIA fragmentation frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsMsType {
    Precursor,
    MrmFragment,
    PasefFragment,
    DiaFragment,
    Unknown,
}

impl From<i64> for MsMsType {
    fn from(item: i64) -> Self {
        match item {
            0 => MsMsType::Precursor,
            2 => MsMsType::MrmFragment,
            8 => MsMsType::PasefFragment,
            9 => MsMsType::DiaFragment,
            _ => MsMsType::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_mode_round_trip() {
        for raw in [0, 1, 2, 3, 4, 8, 9, 10, 20] {
            assert_eq!(ScanMode::from(raw).to_i64(), raw);
        }
        assert_eq!(ScanMode::from(77), ScanMode::Unknown);
    }

    #[test]
    fn test_ms_ms_type() {
        assert_eq!(MsMsType::from(0), MsMsType::Precursor);
        assert_eq!(MsMsType::from(2), MsMsType::MrmFragment);
        assert_eq!(MsMsType::from(8), MsMsType::PasefFragment);
        assert_eq!(MsMsType::from(5), MsMsType::Unknown);
    }
}
