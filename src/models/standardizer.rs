//! Per-column standardization fitted on the training partition

use crate::features::FeatureSchema;
use serde::{Deserialize, Serialize};

fn finite_cells(rows: &[Vec<f64>], pos: usize) -> impl Iterator<Item = f64> + '_ {
    rows.iter()
        .filter_map(move |r| r.get(pos).copied())
        .filter(|v| v.is_finite())
}

/// Z-score scaling of a named subset of columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standardizer {
    pub columns: Vec<String>,
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
    /// Schema positions of `columns`, resolved by `bind`
    #[serde(skip)]
    positions: Vec<usize>,
}

impl Standardizer {
    /// Fit means and standard deviations of `columns` over `rows`.
    ///
    /// Columns absent from the schema are skipped, as are non-finite cells.
    /// A zero deviation scales by 1; a column whose statistics overflow is
    /// left unscaled.
    pub fn fit(rows: &[Vec<f64>], schema: &FeatureSchema, columns: &[&str]) -> Self {
        let mut names = Vec::new();
        let mut positions = Vec::new();
        let mut means = Vec::new();
        let mut scales = Vec::new();

        for column in columns {
            let Some(pos) = schema.position(column) else {
                continue;
            };
            let n = finite_cells(rows, pos).count().max(1) as f64;
            let mean = finite_cells(rows, pos).sum::<f64>() / n;
            let std = (finite_cells(rows, pos).map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();

            let (mean, scale) = match (mean.is_finite(), std.is_finite()) {
                (true, true) if std > f64::EPSILON => (mean, std),
                (true, _) => (mean, 1.0),
                (false, _) => (0.0, 1.0),
            };

            names.push(column.to_string());
            positions.push(pos);
            means.push(mean);
            scales.push(scale);
        }

        Self {
            columns: names,
            means,
            scales,
            positions,
        }
    }

    /// Resolve column positions against a schema, failing on unknown columns.
    pub fn bind(&mut self, schema: &FeatureSchema) -> Result<(), String> {
        if self.columns.len() != self.means.len() || self.columns.len() != self.scales.len() {
            return Err("standardizer columns, means and scales differ in length".to_string());
        }
        if self.scales.iter().any(|s| !s.is_finite() || *s <= 0.0)
            || self.means.iter().any(|m| !m.is_finite())
        {
            return Err("standardizer has non-finite or non-positive parameters".to_string());
        }
        self.positions = self
            .columns
            .iter()
            .map(|c| {
                schema
                    .position(c)
                    .ok_or_else(|| format!("standardizer column '{c}' is not in the feature schema"))
            })
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    /// Scale the bound columns of `values` in place.
    pub fn transform(&self, values: &mut [f64]) {
        for ((pos, mean), scale) in self.positions.iter().zip(&self.means).zip(&self.scales) {
            if let Some(v) = values.get_mut(*pos) {
                *v = (*v - mean) / scale;
            }
        }
    }

    pub fn transform_rows(&self, rows: &mut [Vec<f64>]) {
        for row in rows {
            self.transform(row);
        }
    }
}
