use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::debug;

use crate::error::{Result, SurvivalError};

/// one column of the observation table
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// continuous values, NaN = missing
    Numeric(Vec<f64>),
    /// level codes into `levels`, None = missing
    Categorical {
        codes: Vec<Option<usize>>,
        levels: Vec<String>,
    },
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Numeric(values) => values.len(),
            Column::Categorical { codes, .. } => codes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_categorical(&self) -> bool {
        matches!(self, Column::Categorical { .. })
    }

    pub fn is_missing(&self, row: usize) -> bool {
        match self {
            Column::Numeric(values) => values[row].is_nan(),
            Column::Categorical { codes, .. } => codes[row].is_none(),
        }
    }

    /// value rendered as text, None when missing
    pub fn display_value(&self, row: usize) -> Option<String> {
        match self {
            Column::Numeric(values) => {
                let v = values[row];
                if v.is_nan() {
                    None
                } else {
                    Some(format_level(v))
                }
            }
            Column::Categorical { codes, levels } => codes[row].map(|c| levels[c].clone()),
        }
    }

    fn select(&self, rows: &[usize]) -> Column {
        match self {
            Column::Numeric(values) => Column::Numeric(rows.iter().map(|&i| values[i]).collect()),
            Column::Categorical { codes, levels } => {
                let kept: Vec<Option<usize>> = rows.iter().map(|&i| codes[i]).collect();

                // levels no remaining row uses are dropped, codes renumbered in level order
                let mut used = vec![false; levels.len()];
                for c in kept.iter().flatten() {
                    used[*c] = true;
                }
                let mut remap = vec![None; levels.len()];
                let mut new_levels = Vec::new();
                for (old, level) in levels.iter().enumerate() {
                    if used[old] {
                        remap[old] = Some(new_levels.len());
                        new_levels.push(level.clone());
                    }
                }
                Column::Categorical {
                    codes: kept.iter().map(|c| c.and_then(|c| remap[c])).collect(),
                    levels: new_levels,
                }
            }
        }
    }
}

/// one row per patient, columns addressed by normalized name
#[derive(Debug, Clone, Default)]
pub struct ObservationTable {
    names: Vec<String>,
    columns: Vec<Column>,
    n_rows: usize,
}

/// strip, lowercase, spaces & dots -> underscores
pub fn normalize_column_name(name: &str) -> String {
    name.trim().to_lowercase().replace([' ', '.'], "_")
}

fn is_missing_token(raw: &str) -> bool {
    raw.is_empty() || raw.eq_ignore_ascii_case("na") || raw.eq_ignore_ascii_case("nan")
}

/// integers print without the trailing `.0`
fn format_level(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

/// distinct values, numeric order when every value is a number
fn sorted_levels(values: impl Iterator<Item = String>) -> Vec<String> {
    let mut levels: Vec<String> = values.collect();
    levels.sort();
    levels.dedup();

    let parsed: Option<Vec<f64>> = levels.iter().map(|l| l.parse::<f64>().ok()).collect();
    if let Some(numbers) = parsed {
        let mut paired: Vec<(f64, String)> = numbers.into_iter().zip(levels).collect();
        paired.sort_by(|a, b| a.0.total_cmp(&b.0));
        levels = paired.into_iter().map(|(_, l)| l).collect();
    }
    levels
}

fn categorical_from_strings(raw: Vec<Option<String>>) -> Column {
    let levels = sorted_levels(raw.iter().flatten().cloned());
    let codes = raw
        .iter()
        .map(|v| v.as_ref().and_then(|s| levels.iter().position(|l| l == s)))
        .collect();
    Column::Categorical { codes, levels }
}

impl ObservationTable {
    /// load a csv file (header row required)
    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("reading observations from {}", path.display());
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    /// parse csv from any reader - column types are inferred, names normalized
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = rdr.headers()?.iter().map(normalize_column_name).collect();
        let mut raw: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];

        for record in rdr.records() {
            let record = record?;
            for (j, cells) in raw.iter_mut().enumerate() {
                let cell = record.get(j).unwrap_or("");
                cells.push(if is_missing_token(cell) {
                    None
                } else {
                    Some(cell.to_string())
                });
            }
        }

        let mut table = Self::default();
        table.n_rows = raw.first().map(|c| c.len()).unwrap_or(0);
        if table.n_rows == 0 {
            return Err(SurvivalError::invalid_survival_data("csv has no data rows"));
        }

        for (name, cells) in headers.into_iter().zip(raw) {
            if table.names.contains(&name) {
                return Err(SurvivalError::invalid_survival_data(format!(
                    "duplicate column '{}' after name normalization",
                    name
                )));
            }

            let numbers: Option<Vec<f64>> = cells
                .iter()
                .map(|c| match c {
                    None => Some(f64::NAN),
                    Some(s) => s.parse::<f64>().ok(),
                })
                .collect();

            let column = match numbers {
                Some(values) => Column::Numeric(values),
                None => categorical_from_strings(cells),
            };
            table.names.push(name);
            table.columns.push(column);
        }

        debug!("loaded {} rows x {} columns", table.n_rows, table.names.len());
        Ok(table)
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        self.names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| SurvivalError::missing_column(name))
    }

    pub fn column(&self, name: &str) -> Result<&Column> {
        Ok(&self.columns[self.index_of(name)?])
    }

    /// numeric view of a continuous column
    pub fn numeric(&self, name: &str) -> Result<&[f64]> {
        match self.column(name)? {
            Column::Numeric(values) => Ok(values),
            Column::Categorical { .. } => Err(SurvivalError::invalid_survival_data(format!(
                "column '{}' is categorical, expected numbers",
                name
            ))),
        }
    }

    /// convert a column to categorical; already-categorical columns are left alone
    pub fn cast_categorical(&mut self, name: &str) -> Result<()> {
        let idx = self.index_of(name)?;
        if let Column::Numeric(values) = &self.columns[idx] {
            let raw = values
                .iter()
                .map(|&v| if v.is_nan() { None } else { Some(format_level(v)) })
                .collect();
            self.columns[idx] = categorical_from_strings(raw);
        }
        Ok(())
    }

    /// insert or replace a numeric column
    pub fn add_numeric_column(&mut self, name: &str, values: Vec<f64>) -> Result<()> {
        if values.len() != self.n_rows {
            return Err(SurvivalError::invalid_dimensions(format!(
                "column '{}' has {} values, table has {} rows",
                name,
                values.len(),
                self.n_rows
            )));
        }

        match self.names.iter().position(|n| n == name) {
            Some(idx) => self.columns[idx] = Column::Numeric(values),
            None => {
                self.names.push(name.to_string());
                self.columns.push(Column::Numeric(values));
            }
        }
        Ok(())
    }

    /// natural log of `source` stored as `target` - missing stays missing
    pub fn add_log_column(&mut self, source: &str, target: &str) -> Result<()> {
        let values = self.numeric(source)?;
        if values.iter().any(|&v| !v.is_nan() && v <= 0.0) {
            return Err(SurvivalError::invalid_survival_data(format!(
                "can't take log of non-positive values in '{}'",
                source
            )));
        }
        let logged = values.iter().map(|&v| v.ln()).collect();
        self.add_numeric_column(target, logged)
    }

    /// complete-case filter on the given columns, returns rows dropped
    pub fn drop_missing(&mut self, columns: &[&str]) -> Result<usize> {
        let indices = columns
            .iter()
            .map(|c| self.index_of(c))
            .collect::<Result<Vec<_>>>()?;

        let keep: Vec<usize> = (0..self.n_rows)
            .filter(|&row| indices.iter().all(|&j| !self.columns[j].is_missing(row)))
            .collect();

        let dropped = self.n_rows - keep.len();
        if dropped > 0 {
            self.columns = self.columns.iter().map(|c| c.select(&keep)).collect();
            self.n_rows = keep.len();
        }
        Ok(dropped)
    }

    /// per-row label like `1_f` built from the given columns
    pub fn group_labels(&self, columns: &[&str]) -> Result<Vec<String>> {
        let cols = columns
            .iter()
            .map(|c| self.column(c))
            .collect::<Result<Vec<_>>>()?;

        Ok((0..self.n_rows)
            .map(|row| {
                cols.iter()
                    .map(|c| c.display_value(row).unwrap_or_else(|| "NA".to_string()))
                    .collect::<Vec<_>>()
                    .join("_")
            })
            .collect())
    }

    /// group label -> row indices, labels in sorted order
    pub fn group_indices(&self, columns: &[&str]) -> Result<BTreeMap<String, Vec<usize>>> {
        let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (row, label) in self.group_labels(columns)?.into_iter().enumerate() {
            groups.entry(label).or_default().push(row);
        }
        Ok(groups)
    }
}
