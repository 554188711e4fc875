//! Minimal string table over CSV files, shared by the stages downstream of
//! extraction. Cells are strings; numeric access goes through the NaN-aware
//! parser (empty cell == NaN).

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

use crate::timeseries::{fmt_num, parse_num};

pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: Vec<String>) -> Table {
        Table {
            headers,
            rows: Vec::new(),
        }
    }

    pub fn read_csv(path: &Path) -> Result<Table> {
        let mut rdr = csv::Reader::from_path(path)
            .with_context(|| format!("Failed to open CSV: {}", path.display()))?;
        let headers = rdr
            .headers()?
            .iter()
            .map(|h| h.to_string())
            .collect::<Vec<_>>();
        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record?;
            let mut row: Vec<String> = record.iter().map(|c| c.to_string()).collect();
            // Tolerate ragged short rows.
            row.resize(headers.len(), String::new());
            rows.push(row);
        }
        Ok(Table { headers, rows })
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut wtr = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        wtr.write_record(&self.headers)?;
        for row in &self.rows {
            wtr.write_record(row)?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Index of a required column; missing columns are a fatal configuration
    /// error.
    pub fn col(&self, name: &str) -> Result<usize> {
        match self.col_opt(name) {
            Some(i) => Ok(i),
            None => bail!("Missing required column: {}", name),
        }
    }

    pub fn col_opt(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn get<'a>(&'a self, row: usize, col: usize) -> &'a str {
        &self.rows[row][col]
    }

    pub fn num(&self, row: usize, col: usize) -> f64 {
        parse_num(&self.rows[row][col])
    }

    /// Append a column; `values` must be row-aligned.
    pub fn add_num_column(&mut self, name: &str, values: &[f64]) {
        self.headers.push(name.to_string());
        for (row, v) in self.rows.iter_mut().zip(values.iter()) {
            row.push(fmt_num(*v));
        }
    }

    pub fn add_str_column(&mut self, name: &str, values: Vec<String>) {
        self.headers.push(name.to_string());
        for (row, v) in self.rows.iter_mut().zip(values.into_iter()) {
            row.push(v);
        }
    }
}
