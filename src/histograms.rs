use std::fmt::Display;

use accurate::{sum::Klein, traits::*};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    utils::{get_bin_edges, get_bin_index, stats::RunningStats},
    FlowError, FlowResult, ReadWrite,
};

/// Evenly spaced bins over `[low, high)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    /// Number of bins.
    pub bins: usize,
    /// The `(low, high)` edges.
    pub range: (f64, f64),
}

impl Axis {
    /// Construct a new axis.
    pub fn new(bins: usize, range: (f64, f64)) -> Self {
        Self { bins, range }
    }
    /// The bin containing `value`, if any.
    pub fn index(&self, value: f64) -> Option<usize> {
        get_bin_index(value, self.bins, self.range)
    }
    /// All `bins + 1` edges.
    pub fn edges(&self) -> Vec<f64> {
        get_bin_edges(self.bins, self.range)
    }
    /// The centre of bin `index`.
    pub fn center(&self, index: usize) -> f64 {
        let width = (self.range.1 - self.range.0) / self.bins as f64;
        self.range.0 + (index as f64 + 0.5) * width
    }
}

/// A weighted one-dimensional histogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hist1D {
    /// The binning.
    pub axis: Axis,
    /// Summed weights per bin.
    pub counts: Vec<f64>,
    /// Summed weight below the range.
    pub underflow: f64,
    /// Summed weight at or above the range.
    pub overflow: f64,
    /// Number of fills, including out-of-range ones.
    pub entries: u64,
}

impl Hist1D {
    /// An empty histogram.
    pub fn new(axis: Axis) -> Self {
        Self {
            axis,
            counts: vec![0.0; axis.bins],
            underflow: 0.0,
            overflow: 0.0,
            entries: 0,
        }
    }

    /// Add `weight` at `value`. NaN values are counted as entries but land in no bin.
    pub fn fill(&mut self, value: f64, weight: f64) {
        self.entries += 1;
        match self.axis.index(value) {
            Some(index) => self.counts[index] += weight,
            None if value < self.axis.range.0 => self.underflow += weight,
            None if value >= self.axis.range.1 => self.overflow += weight,
            None => {}
        }
    }

    /// Summed in-range weight.
    pub fn integral(&self) -> f64 {
        self.counts
            .iter()
            .copied()
            .sum_with_accumulator::<Klein<f64>>()
    }

    /// The weighted mean of the bin centres.
    pub fn mean(&self) -> Option<f64> {
        let total = self.integral();
        if total <= 0.0 {
            return None;
        }
        let moment = self
            .counts
            .iter()
            .enumerate()
            .map(|(i, c)| c * self.axis.center(i))
            .sum_with_accumulator::<Klein<f64>>();
        Some(moment / total)
    }
}

/// A weighted two-dimensional histogram, stored row-major in `x`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hist2D {
    /// The `x` binning.
    pub x_axis: Axis,
    /// The `y` binning.
    pub y_axis: Axis,
    /// Summed weights, index `ix * y_bins + iy`.
    pub counts: Vec<f64>,
    /// Summed weight outside the range in either coordinate.
    pub out_of_range: f64,
    /// Number of fills.
    pub entries: u64,
}

impl Hist2D {
    /// An empty histogram.
    pub fn new(x_axis: Axis, y_axis: Axis) -> Self {
        Self {
            x_axis,
            y_axis,
            counts: vec![0.0; x_axis.bins * y_axis.bins],
            out_of_range: 0.0,
            entries: 0,
        }
    }

    /// Add `weight` at `(x, y)`.
    pub fn fill(&mut self, x: f64, y: f64, weight: f64) {
        self.entries += 1;
        match (self.x_axis.index(x), self.y_axis.index(y)) {
            (Some(ix), Some(iy)) => self.counts[ix * self.y_axis.bins + iy] += weight,
            _ => self.out_of_range += weight,
        }
    }

    /// The content of bin `(ix, iy)`.
    pub fn get(&self, ix: usize, iy: usize) -> Option<f64> {
        if ix < self.x_axis.bins && iy < self.y_axis.bins {
            Some(self.counts[ix * self.y_axis.bins + iy])
        } else {
            None
        }
    }

    /// Summed in-range weight.
    pub fn integral(&self) -> f64 {
        self.counts
            .iter()
            .copied()
            .sum_with_accumulator::<Klein<f64>>()
    }
}

/// The mean of a quantity in bins of one variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile1D {
    /// The binning.
    pub axis: Axis,
    /// One accumulator per bin.
    pub bins: Vec<RunningStats>,
    /// Number of fills outside the range.
    pub out_of_range: u64,
}

impl Profile1D {
    /// An empty profile.
    pub fn new(axis: Axis) -> Self {
        Self {
            axis,
            bins: vec![RunningStats::default(); axis.bins],
            out_of_range: 0,
        }
    }

    /// Fold `value` with `weight` into the bin containing `x`.
    pub fn fill(&mut self, x: f64, value: f64, weight: f64) {
        match self.axis.index(x) {
            Some(index) => self.bins[index].push_weighted(value, weight),
            None => self.out_of_range += 1,
        }
    }

    /// The accumulator of bin `index`.
    pub fn bin(&self, index: usize) -> Option<&RunningStats> {
        self.bins.get(index)
    }
}

/// The mean of a quantity in bins of two variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile2D {
    /// The `x` binning.
    pub x_axis: Axis,
    /// The `y` binning.
    pub y_axis: Axis,
    /// One accumulator per bin, index `ix * y_bins + iy`.
    pub bins: Vec<RunningStats>,
    /// Number of fills outside the range.
    pub out_of_range: u64,
}

impl Profile2D {
    /// An empty profile.
    pub fn new(x_axis: Axis, y_axis: Axis) -> Self {
        Self {
            x_axis,
            y_axis,
            bins: vec![RunningStats::default(); x_axis.bins * y_axis.bins],
            out_of_range: 0,
        }
    }

    /// Fold `value` with `weight` into the bin containing `(x, y)`.
    pub fn fill(&mut self, x: f64, y: f64, value: f64, weight: f64) {
        match (self.x_axis.index(x), self.y_axis.index(y)) {
            (Some(ix), Some(iy)) => {
                self.bins[ix * self.y_axis.bins + iy].push_weighted(value, weight)
            }
            _ => self.out_of_range += 1,
        }
    }

    /// The accumulator of bin `(ix, iy)`.
    pub fn bin(&self, ix: usize, iy: usize) -> Option<&RunningStats> {
        if ix < self.x_axis.bins && iy < self.y_axis.bins {
            self.bins.get(ix * self.y_axis.bins + iy)
        } else {
            None
        }
    }
}

/// Any accumulator held by a [`HistogramStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Histogram {
    /// See [`Hist1D`].
    H1(Hist1D),
    /// See [`Hist2D`].
    H2(Hist2D),
    /// See [`Profile1D`].
    P1(Profile1D),
    /// See [`Profile2D`].
    P2(Profile2D),
}

impl Histogram {
    /// A short name for the kind of accumulator.
    pub fn kind(&self) -> &'static str {
        match self {
            Histogram::H1(_) => "1D histogram",
            Histogram::H2(_) => "2D histogram",
            Histogram::P1(_) => "1D profile",
            Histogram::P2(_) => "2D profile",
        }
    }

    /// Number of fills received.
    pub fn entries(&self) -> u64 {
        match self {
            Histogram::H1(h) => h.entries,
            Histogram::H2(h) => h.entries,
            Histogram::P1(p) => p.bins.iter().map(RunningStats::entries).sum::<u64>() + p.out_of_range,
            Histogram::P2(p) => p.bins.iter().map(RunningStats::entries).sum::<u64>() + p.out_of_range,
        }
    }
}

/// The name of a histogram. Region, centrality and rapidity indices are encoded as
/// `/`-separated parts of the name, e.g. `psi_flat/full` or `v1_eta/cent3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistKey(String);

impl HistKey {
    /// A key with a single part.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
    /// Append a part.
    pub fn with(mut self, part: impl Display) -> Self {
        self.0.push('/');
        self.0.push_str(&part.to_string());
        self
    }
    /// The full name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for HistKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for HistKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// An ordered map from [`HistKey`] to [`Histogram`].
///
/// One store is created per pass and handed to the event loop by mutable reference; there is
/// no global histogram state. Booking a key that already exists keeps the existing accumulator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramStore {
    hists: IndexMap<HistKey, Histogram>,
}

impl ReadWrite for HistogramStore {}

macro_rules! accessors {
    ($get:ident, $get_mut:ident, $variant:ident, $ty:ty) => {
        /// Look up an accumulator of this kind.
        pub fn $get(&self, key: &HistKey) -> FlowResult<&$ty> {
            match self.hists.get(key) {
                Some(Histogram::$variant(h)) => Ok(h),
                Some(_) => Err(FlowError::HistogramKindMismatch {
                    name: key.to_string(),
                    expected: stringify!($ty),
                }),
                None => Err(FlowError::HistogramNotFound {
                    name: key.to_string(),
                }),
            }
        }

        fn $get_mut(&mut self, key: &HistKey) -> FlowResult<&mut $ty> {
            match self.hists.get_mut(key) {
                Some(Histogram::$variant(h)) => Ok(h),
                Some(_) => Err(FlowError::HistogramKindMismatch {
                    name: key.to_string(),
                    expected: stringify!($ty),
                }),
                None => Err(FlowError::HistogramNotFound {
                    name: key.to_string(),
                }),
            }
        }
    };
}

impl HistogramStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    accessors!(hist_1d, hist_1d_mut, H1, Hist1D);
    accessors!(hist_2d, hist_2d_mut, H2, Hist2D);
    accessors!(profile_1d, profile_1d_mut, P1, Profile1D);
    accessors!(profile_2d, profile_2d_mut, P2, Profile2D);

    /// Book a [`Hist1D`].
    pub fn book_1d(&mut self, key: HistKey, axis: Axis) {
        self.hists
            .entry(key)
            .or_insert_with(|| Histogram::H1(Hist1D::new(axis)));
    }

    /// Book a [`Hist2D`].
    pub fn book_2d(&mut self, key: HistKey, x_axis: Axis, y_axis: Axis) {
        self.hists
            .entry(key)
            .or_insert_with(|| Histogram::H2(Hist2D::new(x_axis, y_axis)));
    }

    /// Book a [`Profile1D`].
    pub fn book_profile_1d(&mut self, key: HistKey, axis: Axis) {
        self.hists
            .entry(key)
            .or_insert_with(|| Histogram::P1(Profile1D::new(axis)));
    }

    /// Book a [`Profile2D`].
    pub fn book_profile_2d(&mut self, key: HistKey, x_axis: Axis, y_axis: Axis) {
        self.hists
            .entry(key)
            .or_insert_with(|| Histogram::P2(Profile2D::new(x_axis, y_axis)));
    }

    /// Fill a booked [`Hist1D`].
    pub fn fill_1d(&mut self, key: &HistKey, value: f64, weight: f64) -> FlowResult<()> {
        self.hist_1d_mut(key)?.fill(value, weight);
        Ok(())
    }

    /// Fill a booked [`Hist2D`].
    pub fn fill_2d(&mut self, key: &HistKey, x: f64, y: f64, weight: f64) -> FlowResult<()> {
        self.hist_2d_mut(key)?.fill(x, y, weight);
        Ok(())
    }

    /// Fill a booked [`Profile1D`] with unit weight.
    pub fn fill_profile_1d(&mut self, key: &HistKey, x: f64, value: f64) -> FlowResult<()> {
        self.profile_1d_mut(key)?.fill(x, value, 1.0);
        Ok(())
    }

    /// Fill a booked [`Profile2D`] with unit weight.
    pub fn fill_profile_2d(
        &mut self,
        key: &HistKey,
        x: f64,
        y: f64,
        value: f64,
    ) -> FlowResult<()> {
        self.profile_2d_mut(key)?.fill(x, y, value, 1.0);
        Ok(())
    }

    /// Any accumulator under `key`.
    pub fn get(&self, key: &HistKey) -> Option<&Histogram> {
        self.hists.get(key)
    }

    /// Iterate in booking order.
    pub fn iter(&self) -> impl Iterator<Item = (&HistKey, &Histogram)> {
        self.hists.iter()
    }

    /// Number of booked accumulators.
    pub fn len(&self) -> usize {
        self.hists.len()
    }

    /// Whether nothing is booked.
    pub fn is_empty(&self) -> bool {
        self.hists.is_empty()
    }
}

impl Display for HistogramStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let width = self
            .hists
            .keys()
            .map(|key| key.as_str().len())
            .max()
            .unwrap_or(0);
        for (key, hist) in &self.hists {
            writeln!(
                f,
                "{:<width$}  {:<13}  {} entries",
                key.as_str(),
                hist.kind(),
                hist.entries()
            )?;
        }
        Ok(())
    }
}
