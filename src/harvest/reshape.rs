//! Row-to-column reshaping of harvested series for transfer.

use crate::model::{HarvestedSeries, TransferBundle};
use crate::traits::HarvestError;

/// Text partition, in column order.
pub const TEXT_COLUMNS: [&str; 4] = ["sample_name", "well", "compound", "source"];
/// Numeric partition, in column order.
pub const NUMERIC_COLUMNS: [&str; 2] = ["x", "y"];

/// Transposes series records into parallel text and numeric columns.
pub fn reshape(series: Vec<HarvestedSeries>) -> Result<TransferBundle, HarvestError> {
    if series.is_empty() {
        return Err(HarvestError::EmptyHarvest);
    }

    let rows = series.len();
    let mut text: [Vec<String>; TEXT_COLUMNS.len()] = Default::default();
    let mut numeric: [Vec<Vec<f64>>; NUMERIC_COLUMNS.len()] = Default::default();
    for column in text.iter_mut() {
        column.reserve(rows);
    }
    for column in numeric.iter_mut() {
        column.reserve(rows);
    }

    for s in series {
        text[0].push(s.sample_name);
        text[1].push(s.well);
        text[2].push(s.compound);
        text[3].push(s.resolved_tag);
        numeric[0].push(s.x);
        numeric[1].push(s.y);
    }

    Ok(TransferBundle {
        text_columns: text.into(),
        numeric_columns: numeric.into(),
    })
}

impl TransferBundle {
    /// Number of series in the bundle.
    pub fn len(&self) -> usize {
        self.text_columns.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rebuilds the row-oriented records. Missing columns read as empty.
    pub fn into_series(self) -> Vec<HarvestedSeries> {
        let mut text = self
            .text_columns
            .into_iter()
            .take(TEXT_COLUMNS.len())
            .map(Vec::into_iter);
        let mut numeric = self
            .numeric_columns
            .into_iter()
            .take(NUMERIC_COLUMNS.len())
            .map(Vec::into_iter);
        let mut next_text = || text.next().unwrap_or_default();
        let (mut names, mut wells, mut compounds, mut tags) =
            (next_text(), next_text(), next_text(), next_text());
        let mut xs = numeric.next().unwrap_or_default();
        let mut ys = numeric.next().unwrap_or_default();

        let mut series = Vec::new();
        while let Some(sample_name) = names.next() {
            series.push(HarvestedSeries {
                sample_name,
                well: wells.next().unwrap_or_default(),
                compound: compounds.next().unwrap_or_default(),
                resolved_tag: tags.next().unwrap_or_default(),
                x: xs.next().unwrap_or_default(),
                y: ys.next().unwrap_or_default(),
            });
        }
        series
    }

    pub fn to_json(&self) -> Result<String, HarvestError> {
        Ok(serde_json::to_string(self)?)
    }
}
