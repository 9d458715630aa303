use chrono::{Datelike, NaiveDate};

/// Grouping key shared by every per-field computation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    pub year: i32,
    pub field_id: String,
}

impl GroupKey {
    pub fn new(year: i32, field_id: impl Into<String>) -> Self {
        Self {
            year,
            field_id: field_id.into(),
        }
    }
}

/// Row types that belong to a (year, field_id) group and can be ordered by date.
pub trait Dated {
    fn date(&self) -> NaiveDate;
    fn field_id(&self) -> &str;

    fn group_key(&self) -> GroupKey {
        GroupKey::new(self.date().year(), self.field_id())
    }
}

/// A single NDVI measurement as delivered by the ingestion layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub date: NaiveDate,
    pub field_id: String,
    pub ndvi: Option<f64>,
}

/// Observation with a known NDVI and its valley feature.
#[derive(Debug, Clone, PartialEq)]
pub struct FlaggedObservation {
    pub date: NaiveDate,
    pub field_id: String,
    pub ndvi: f64,
    pub valley: bool,
}

impl FlaggedObservation {
    /// Unflagged row, or `None` when the observation has no NDVI.
    pub fn from_observation(obs: Observation) -> Option<Self> {
        let ndvi = obs.ndvi.filter(|v| v.is_finite())?;
        Some(Self {
            date: obs.date,
            field_id: obs.field_id,
            ndvi,
            valley: false,
        })
    }

    /// Feature vector consumed by the anomaly model: `[NDVI, valley]`.
    pub fn features(&self) -> [f64; 2] {
        [self.ndvi, if self.valley { 1.0 } else { 0.0 }]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyLabel {
    Normal,
    Outlier,
}

/// Row of the cleaned (and optionally smoothed) output series.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesRow {
    pub date: NaiveDate,
    pub field_id: String,
    pub ndvi: f64,
    pub dif_to_forelast: Option<f64>,
}

/// Input row of cutting detection. Only the lag difference is read, so rows
/// whose NDVI was missing upstream still take part in the ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct DifferenceRow {
    pub date: NaiveDate,
    pub field_id: String,
    pub dif_to_forelast: Option<f64>,
}

/// Series handed to cutting detection.
#[derive(Debug, Clone, PartialEq)]
pub enum SeriesInput {
    /// Table already carrying `dif_to_forelast`.
    WithDifferences(Vec<DifferenceRow>),
    /// NDVI only; differences are computed before clustering.
    NdviOnly(Vec<SeriesRow>),
}

impl SeriesInput {
    pub fn with_differences(rows: Vec<SeriesRow>) -> Self {
        SeriesInput::WithDifferences(rows.into_iter().map(DifferenceRow::from).collect())
    }
}

/// Cutting events found for one (year, field_id) group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CuttingRecord {
    pub year: i32,
    pub field_id: String,
    pub cut_dates: Vec<NaiveDate>,
}

impl From<FlaggedObservation> for SeriesRow {
    fn from(row: FlaggedObservation) -> Self {
        Self {
            date: row.date,
            field_id: row.field_id,
            ndvi: row.ndvi,
            dif_to_forelast: None,
        }
    }
}

impl From<SeriesRow> for DifferenceRow {
    fn from(row: SeriesRow) -> Self {
        Self {
            date: row.date,
            field_id: row.field_id,
            dif_to_forelast: row.dif_to_forelast,
        }
    }
}

impl CuttingRecord {
    pub fn num_cuts(&self) -> usize {
        self.cut_dates.len()
    }
}

impl Dated for Observation {
    fn date(&self) -> NaiveDate {
        self.date
    }
    fn field_id(&self) -> &str {
        &self.field_id
    }
}

impl Dated for FlaggedObservation {
    fn date(&self) -> NaiveDate {
        self.date
    }
    fn field_id(&self) -> &str {
        &self.field_id
    }
}

impl Dated for SeriesRow {
    fn date(&self) -> NaiveDate {
        self.date
    }
    fn field_id(&self) -> &str {
        &self.field_id
    }
}

impl Dated for DifferenceRow {
    fn date(&self) -> NaiveDate {
        self.date
    }
    fn field_id(&self) -> &str {
        &self.field_id
    }
}
