//! A data owner's input file.
//!
//! The first non-comment line names the columns, each of which must belong to the
//! owner's vertical. Whitespace is ignored and lines starting with `#` are skipped.

use std::{collections::HashSet, fs, path::Path};

use num_bigint::BigUint;

use crate::{config::VerticalSpec, error::ConfigError};

#[derive(Clone, Debug)]
pub struct CsvTable {
    file: String,
    header: Vec<String>,
    /// (line number, cells)
    rows: Vec<(usize, Vec<String>)>,
}

impl CsvTable {
    pub fn load(path: impl AsRef<Path>, vertical: &VerticalSpec) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        Self::parse(&text, &path.display().to_string(), vertical)
    }

    pub fn parse(text: &str, file: &str, vertical: &VerticalSpec) -> Result<Self, ConfigError> {
        let error = |line: usize, msg: String| ConfigError::Csv {
            file: file.to_string(),
            line,
            msg,
        };

        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, line)| {
                (i + 1, line.chars().filter(|c| !c.is_whitespace()).collect::<String>())
            })
            .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'));

        let (header_line, header) = lines
            .next()
            .ok_or_else(|| error(1, "missing header".to_string()))?;
        let header: Vec<String> = header.split(',').map(str::to_string).collect();
        for (i, name) in header.iter().enumerate() {
            if !vertical.columns.iter().any(|c| &c.name == name) {
                return Err(error(
                    header_line,
                    format!(
                        "column {:?} is not part of vertical {}",
                        name, vertical.vertical_index
                    ),
                ));
            }
            if header[..i].contains(name) {
                return Err(error(header_line, format!("column {:?} appears twice", name)));
            }
        }

        let rows = lines
            .map(|(number, line)| {
                let cells: Vec<String> = line.split(',').map(str::to_string).collect();
                if cells.len() != header.len() {
                    return Err(error(
                        number,
                        format!("{} cells, header has {}", cells.len(), header.len()),
                    ));
                }
                Ok((number, cells))
            })
            .collect::<Result<_, _>>()?;

        Ok(Self {
            file: file.to_string(),
            header,
            rows,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    fn position(&self, name: &str) -> Result<usize, ConfigError> {
        self.header
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| ConfigError::invalid(format!("{} has no column {:?}", self.file, name)))
    }

    fn error(&self, line: usize, msg: String) -> ConfigError {
        ConfigError::Csv {
            file: self.file.clone(),
            line,
            msg,
        }
    }

    /// Values of a numeric column; booleans read as 0 and 1.
    pub fn numbers(&self, name: &str) -> Result<Vec<f64>, ConfigError> {
        let col = self.position(name)?;
        self.rows
            .iter()
            .map(|(line, cells)| {
                let cell = &cells[col];
                match cell.as_str() {
                    "true" | "TRUE" | "True" => Ok(1.0),
                    "false" | "FALSE" | "False" => Ok(0.0),
                    _ => cell
                        .parse::<f64>()
                        .ok()
                        .filter(|x| x.is_finite())
                        .ok_or_else(|| self.error(*line, format!("{:?} is not a number", cell))),
                }
            })
            .collect()
    }

    /// Composite join keys `Σ k_c · key_max^(m-1-c)` over the named key columns.
    ///
    /// Every key column must hold integers in `[0, key_max)` and no two rows may share
    /// a composite key.
    pub fn join_keys(&self, names: &[&str], key_max: u64) -> Result<Vec<BigUint>, ConfigError> {
        let cols = names
            .iter()
            .map(|name| self.position(name))
            .collect::<Result<Vec<_>, _>>()?;
        let base = BigUint::from(key_max);
        let mut seen = HashSet::new();
        let mut keys = Vec::with_capacity(self.rows.len());
        for (line, cells) in &self.rows {
            let mut key = BigUint::default();
            for &col in &cols {
                let part = cells[col]
                    .parse::<u64>()
                    .ok()
                    .filter(|k| *k < key_max)
                    .ok_or_else(|| {
                        let reason = format!(
                            "join key {:?} is not an integer below {}",
                            cells[col], key_max
                        );
                        self.error(*line, reason)
                    })?;
                key = key * &base + part;
            }
            if !seen.insert(key.clone()) {
                return Err(self.error(*line, "duplicate join key".to_string()));
            }
            keys.push(key);
        }
        Ok(keys)
    }
}
