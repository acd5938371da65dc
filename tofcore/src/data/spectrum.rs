use std::fmt;
use std::fmt::{Display, Formatter};
use serde::{Serialize, Deserialize};

/// Polarity of an acquisition, as stored in the Frames table ('+' or '-').
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum Polarity {
    Positive,
    Negative,
}

impl Display for Polarity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Polarity::Positive => write!(f, "+"),
            Polarity::Negative => write!(f, "-"),
        }
    }
}

/// Dissociation type of a fragmentation event. timsTOF DDA-PASEF data is CID.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum DissociationType {
    Cid,
}

impl Display for DissociationType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DissociationType::Cid => write!(f, "CID"),
        }
    }
}

/// An inclusive m/z range, e.g. the acquisition scan window.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MzRange {
    pub min: f64,
    pub max: f64,
}

impl MzRange {
    pub fn new(min: f64, max: f64) -> Self {
        MzRange { min, max }
    }

    pub fn contains(&self, mz: f64) -> bool {
        mz >= self.min && mz <= self.max
    }
}

impl Display for MzRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[{};{}]", self.min, self.max)
    }
}

/// Represents a mass spectrum with associated m/z values and intensities.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MzSpectrum {
    pub mz: Vec<f64>,
    pub intensity: Vec<f64>,
}

impl MzSpectrum {
    /// Constructs a new `MzSpectrum`.
    ///
    /// # Arguments
    ///
    /// * `mz` - A vector of m/z values, sorted ascending.
    /// * `intensity` - A vector of intensity values, parallel to `mz`.
    ///
    /// # Panics
    ///
    /// Panics if the two vectors differ in length.
    pub fn new(mz: Vec<f64>, intensity: Vec<f64>) -> Self {
        assert_eq!(mz.len(), intensity.len());
        MzSpectrum { mz, intensity }
    }

    pub fn len(&self) -> usize {
        self.mz.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mz.is_empty()
    }

    /// Position and m/z of the most intense peak, or `None` for an empty spectrum.
    pub fn base_peak(&self) -> Option<(usize, f64)> {
        self.intensity
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| (i, self.mz[i]))
    }
}

impl Display for MzSpectrum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "MzSpectrum(peaks: {})", self.mz.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_peak() {
        let spectrum = MzSpectrum::new(vec![100.0, 200.0, 300.0], vec![10.0, 50.0, 20.0]);
        let (idx, mz) = spectrum.base_peak().unwrap();
        assert_eq!(idx, 1);
        assert!((mz - 200.0).abs() < 1e-9);
        assert!(MzSpectrum::default().base_peak().is_none());
    }
}
