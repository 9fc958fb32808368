use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::{FlowError, FlowResult};

/// One centrality class: a label and the `[low, high)` multiplicity range it covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CentralityBin {
    /// Human-readable label such as `"0-5%"`.
    pub label: String,
    /// Lowest multiplicity in the class.
    pub low: u32,
    /// First multiplicity above the class.
    pub high: u32,
}

impl CentralityBin {
    /// Construct a new bin.
    pub fn new(label: impl Into<String>, low: u32, high: u32) -> Self {
        Self {
            label: label.into(),
            low,
            high,
        }
    }
    /// Whether the multiplicity falls into `[low, high)`.
    pub fn contains(&self, multiplicity: u32) -> bool {
        self.low <= multiplicity && multiplicity < self.high
    }
}

/// The outcome of classifying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Centrality {
    /// Index into the classifier's bins, `0` being the most central.
    Bin(usize),
    /// At or above the upper edge of the most central bin.
    Pileup,
    /// Below the lower edge of the most peripheral bin.
    TooLow,
}

impl Centrality {
    /// The bin index, if the event was classified into a bin.
    pub fn bin(&self) -> Option<usize> {
        match self {
            Centrality::Bin(index) => Some(*index),
            _ => None,
        }
    }
}

impl Display for Centrality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Centrality::Bin(index) => write!(f, "bin {index}"),
            Centrality::Pileup => write!(f, "pileup"),
            Centrality::TooLow => write!(f, "too low"),
        }
    }
}

/// Buckets good-track multiplicity into centrality classes.
///
/// The bins are contiguous and ordered by decreasing activity, so together with the
/// [`Centrality::Pileup`] and [`Centrality::TooLow`] outcomes they partition every
/// non-negative multiplicity.
#[derive(Debug, Clone)]
pub struct CentralityClassifier {
    bins: Vec<CentralityBin>,
}

impl CentralityClassifier {
    /// Construct a classifier, checking that the bins are non-empty, ordered from most to least
    /// central, and contiguous.
    pub fn new(bins: Vec<CentralityBin>) -> FlowResult<Self> {
        if bins.is_empty() {
            return Err(FlowError::InvalidConfig {
                reason: "at least one centrality bin is required".to_string(),
            });
        }
        for bin in &bins {
            if bin.low >= bin.high {
                return Err(FlowError::InvalidConfig {
                    reason: format!(
                        "centrality bin \"{}\" has empty range [{}, {})",
                        bin.label, bin.low, bin.high
                    ),
                });
            }
        }
        for pair in bins.windows(2) {
            if pair[1].high != pair[0].low {
                return Err(FlowError::InvalidConfig {
                    reason: format!(
                        "centrality bins \"{}\" and \"{}\" are not contiguous ({} != {})",
                        pair[0].label, pair[1].label, pair[0].low, pair[1].high
                    ),
                });
            }
        }
        Ok(Self { bins })
    }

    /// Classify a good-track multiplicity.
    pub fn classify(&self, multiplicity: u32) -> Centrality {
        if multiplicity >= self.upper_edge() {
            return Centrality::Pileup;
        }
        if multiplicity < self.lower_edge() {
            return Centrality::TooLow;
        }
        self.bins
            .iter()
            .position(|bin| bin.contains(multiplicity))
            .map_or(Centrality::TooLow, Centrality::Bin)
    }

    /// The configured bins, most central first.
    pub fn bins(&self) -> &[CentralityBin] {
        &self.bins
    }

    /// Number of centrality classes.
    pub fn n_bins(&self) -> usize {
        self.bins.len()
    }

    /// The label of a bin.
    pub fn label(&self, index: usize) -> Option<&str> {
        self.bins.get(index).map(|bin| bin.label.as_str())
    }

    /// Multiplicities at or above this value are pileup.
    pub fn upper_edge(&self) -> u32 {
        self.bins[0].high
    }

    /// Multiplicities below this value are too low to classify.
    pub fn lower_edge(&self) -> u32 {
        self.bins[self.bins.len() - 1].low
    }
}
