use itertools::Itertools;

use crate::{
    constants::{DEFAULT_COL_DEC, DEFAULT_COL_DEC_ERR, DEFAULT_COL_RA, DEFAULT_COL_RA_ERR},
    pipeline_errors::PipelineError,
};

/// One named column of a [`CatalogTable`].
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Float(Vec<f64>),
    Text(Vec<String>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Float(v) => v.len(),
            Column::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn select(&self, indices: &[usize]) -> Column {
        match self {
            Column::Float(v) => Column::Float(indices.iter().map(|&i| v[i]).collect()),
            Column::Text(v) => Column::Text(indices.iter().map(|&i| v[i].clone()).collect()),
        }
    }

    /// Append the values of `other`.
    ///
    /// An empty side takes the type of the other one; a numeric column receiving text
    /// becomes a text column.
    fn extend(&mut self, other: Column) {
        match (&mut *self, other) {
            (Column::Float(a), Column::Float(b)) => a.extend(b),
            (Column::Text(a), Column::Text(b)) => a.extend(b),
            (_, other) if other.is_empty() => {}
            (this, other) if this.is_empty() => *this = other,
            (this, other) => {
                let text = (0..this.len())
                    .filter_map(|i| this.cell(i))
                    .chain((0..other.len()).filter_map(|i| other.cell(i)))
                    .collect();
                *this = Column::Text(text);
            }
        }
    }

    /// Value of one cell rendered as text.
    pub fn cell(&self, row: usize) -> Option<String> {
        match self {
            Column::Float(v) => v.get(row).map(|x| x.to_string()),
            Column::Text(v) => v.get(row).cloned(),
        }
    }
}

/// Column-named reference catalog.
///
/// Column labels are catalog specific (`RAJ2000` for most VizieR tables, `RA_ICRS` for
/// Gaia, ...). Columns keep the order in which they were inserted or read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogTable {
    names: Vec<String>,
    columns: Vec<Column>,
    n_rows: usize,
}

impl CatalogTable {
    pub fn new() -> Self {
        CatalogTable::default()
    }

    /// Append a numeric column, consuming the table.
    ///
    /// The first column fixes the number of rows; any further column of a different
    /// length is rejected.
    pub fn with_float_column(self, name: &str, values: Vec<f64>) -> Result<Self, PipelineError> {
        self.with_column(name, Column::Float(values))
    }

    /// Append a text column, consuming the table.
    pub fn with_text_column(self, name: &str, values: Vec<String>) -> Result<Self, PipelineError> {
        self.with_column(name, Column::Text(values))
    }

    pub fn with_column(mut self, name: &str, column: Column) -> Result<Self, PipelineError> {
        if self.columns.is_empty() {
            self.n_rows = column.len();
        } else if column.len() != self.n_rows {
            return Err(PipelineError::mismatched(name, self.n_rows, column.len()));
        }

        if let Some(pos) = self.names.iter().position(|n| n == name) {
            self.columns[pos] = column;
        } else {
            self.names.push(name.to_string());
            self.columns.push(column);
        }
        Ok(self)
    }

    /// Parse a comma separated table with a header line.
    ///
    /// A column is numeric when every non-empty cell parses as `f64`; empty cells of a
    /// numeric column become `NaN`. Anything else is kept as text. A header-only
    /// payload gives empty numeric columns.
    ///
    /// Arguments
    /// ---------
    /// * `text`: the CSV payload, as returned by the TAP services
    ///
    /// Return
    /// ------
    /// * The parsed table, or a [`PipelineError::CsvParse`] on malformed input.
    pub fn from_csv(text: &str) -> Result<Self, PipelineError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let names: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut cells: Vec<Vec<String>> = vec![Vec::new(); names.len()];
        for record in reader.records() {
            let record = record?;
            for (column, value) in cells.iter_mut().zip(record.iter()) {
                column.push(value.to_string());
            }
        }

        let n_rows = cells.first().map_or(0, Vec::len);
        let columns = cells.into_iter().map(Self::infer_column).collect();
        Ok(CatalogTable {
            names,
            columns,
            n_rows,
        })
    }

    fn infer_column(values: Vec<String>) -> Column {
        let parsed: Option<Vec<f64>> = values
            .iter()
            .map(|v| {
                if v.is_empty() {
                    Some(f64::NAN)
                } else {
                    v.parse::<f64>().ok()
                }
            })
            .collect();

        match parsed {
            Some(floats) if values.is_empty() || values.iter().any(|v| !v.is_empty()) => {
                Column::Float(floats)
            }
            _ => Column::Text(values),
        }
    }

    pub fn len(&self) -> usize {
        self.n_rows
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn column(&self, name: &str) -> Result<&Column, PipelineError> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|pos| &self.columns[pos])
            .ok_or_else(|| PipelineError::MissingColumn(name.to_string()))
    }

    /// Numeric column by name.
    ///
    /// Return
    /// ------
    /// * [`PipelineError::MissingColumn`] if absent, [`PipelineError::NonNumericColumn`]
    ///   if the column holds text.
    pub fn float_column(&self, name: &str) -> Result<&[f64], PipelineError> {
        match self.column(name)? {
            Column::Float(v) => Ok(v),
            Column::Text(_) => Err(PipelineError::NonNumericColumn(name.to_string())),
        }
    }

    /// Numeric column by name, `None` when the column is absent.
    pub fn optional_float_column(&self, name: &str) -> Result<Option<&[f64]>, PipelineError> {
        if self.has_column(name) {
            self.float_column(name).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Rows at the given indices, in the given order.
    pub fn select(&self, indices: &[usize]) -> CatalogTable {
        CatalogTable {
            names: self.names.clone(),
            columns: self.columns.iter().map(|c| c.select(indices)).collect(),
            n_rows: indices.len(),
        }
    }

    /// Append the rows of `other`, a table holding at least the same columns.
    ///
    /// An empty table without columns takes every column of `other`. Columns of
    /// `other` unknown to `self` are dropped.
    ///
    /// Return
    /// ------
    /// * [`PipelineError::MissingColumn`] when `other` lacks one of the columns.
    pub fn append(&mut self, mut other: CatalogTable) -> Result<(), PipelineError> {
        if self.columns.is_empty() {
            *self = other;
            return Ok(());
        }

        let mut incoming = Vec::with_capacity(self.names.len());
        for name in &self.names {
            let pos = other
                .names
                .iter()
                .position(|n| n == name)
                .ok_or_else(|| PipelineError::MissingColumn(name.clone()))?;
            incoming.push(std::mem::replace(&mut other.columns[pos], Column::Float(vec![])));
        }
        for (column, values) in self.columns.iter_mut().zip(incoming) {
            column.extend(values);
        }
        self.n_rows += other.n_rows;
        Ok(())
    }

    /// Row rendered as `name=value` pairs, for log messages.
    pub fn describe_row(&self, row: usize) -> String {
        self.names
            .iter()
            .zip(&self.columns)
            .filter_map(|(name, col)| col.cell(row).map(|v| format!("{name}={v}")))
            .join(" ")
    }
}

/// Column labels used to read a reference catalog.
///
/// # Fields
///
/// * `ra`, `dec` - Position columns, degrees
/// * `ra_err`, `dec_err` - Positional error columns
/// * `mag` - Reference magnitude
/// * `mag_err` - Optional magnitude error
/// * `mag1`, `mag2` - Optional color pair, the color is `mag1 - mag2`
/// * `flags` - Optional quality column; rows with non-zero flags are never used for fits
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogColumns {
    pub ra: String,
    pub dec: String,
    pub ra_err: String,
    pub dec_err: String,
    pub mag: String,
    pub mag_err: Option<String>,
    pub mag1: Option<String>,
    pub mag2: Option<String>,
    pub flags: Option<String>,
}

impl Default for CatalogColumns {
    fn default() -> Self {
        Self::astrometry()
    }
}

impl CatalogColumns {
    fn with_mag(mag: &str) -> Self {
        CatalogColumns {
            ra: DEFAULT_COL_RA.to_string(),
            dec: DEFAULT_COL_DEC.to_string(),
            ra_err: DEFAULT_COL_RA_ERR.to_string(),
            dec_err: DEFAULT_COL_DEC_ERR.to_string(),
            mag: mag.to_string(),
            mag_err: None,
            mag1: None,
            mag2: None,
            flags: None,
        }
    }

    /// Default labels of the astrometric refinement (`V` magnitude).
    pub fn astrometry() -> Self {
        Self::with_mag("V")
    }

    /// Default labels of the photometric calibration (`R` magnitude).
    pub fn calibration() -> Self {
        Self::with_mag("R")
    }

    pub fn position(mut self, ra: &str, dec: &str) -> Self {
        self.ra = ra.to_string();
        self.dec = dec.to_string();
        self
    }

    pub fn magnitude(mut self, mag: &str, mag_err: Option<&str>) -> Self {
        self.mag = mag.to_string();
        self.mag_err = mag_err.map(str::to_string);
        self
    }

    pub fn color(mut self, mag1: &str, mag2: &str) -> Self {
        self.mag1 = Some(mag1.to_string());
        self.mag2 = Some(mag2.to_string());
        self
    }

    pub fn flags(mut self, flags: &str) -> Self {
        self.flags = Some(flags.to_string());
        self
    }
}
