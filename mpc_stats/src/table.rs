//! F and t distribution tables used to turn test statistics into p-values.
//!
//! Each data line is `dof, p_0, p_1, ...`. Column `j` of the F table holds the
//! upper-tail probability at `F = (j + 1) · step / 2^bits`; the t table is indexed
//! the same way by `t²`. Cells are stored as little-endian fractions of
//! `2^(8 · cell_bytes)`.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use mpc::protocols::lookup::LookupTable;

use crate::{error::ConfigError, fixed_point::fraction_to_bytes};

const DEFAULT_BITS_OF_PRECISION: usize = 5;
const DEFAULT_STEP_SIZE: u64 = 1;

#[derive(Clone, Debug)]
pub struct StatTable {
    row_ids: Vec<u64>,
    bits_of_precision: usize,
    step_size: u64,
    cells: Arc<LookupTable>,
}

pub fn f_table_path(dir: &Path, num_indep_vars: usize) -> PathBuf {
    dir.join(format!("f_table_num_ivs_{}.csv", num_indep_vars))
}

pub fn t_table_path(dir: &Path) -> PathBuf {
    dir.join("t_table.csv")
}

impl StatTable {
    pub fn load(
        path: impl AsRef<Path>,
        cell_bytes: usize,
        max_rows: usize,
    ) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        Self::parse(&text, &path.display().to_string(), cell_bytes, max_rows)
    }

    pub fn parse(
        text: &str,
        file: &str,
        cell_bytes: usize,
        max_rows: usize,
    ) -> Result<Self, ConfigError> {
        let error = |msg: String| ConfigError::Table {
            file: file.to_string(),
            msg,
        };

        let mut bits_of_precision = DEFAULT_BITS_OF_PRECISION;
        let mut step_size = DEFAULT_STEP_SIZE;
        let mut row_ids: Vec<u64> = Vec::new();
        let mut cells = Vec::new();
        let mut num_cols = None;

        for (number, line) in text.lines().enumerate() {
            let line: String = line.chars().filter(|c| !c.is_whitespace()).collect();
            if line.is_empty() {
                continue;
            }
            if let Some(comment) = line.strip_prefix('#') {
                if let Some(value) = comment.strip_prefix("bits_of_precision=") {
                    bits_of_precision = value
                        .parse()
                        .map_err(|_| error(format!("bad bits_of_precision {:?}", value)))?;
                } else if let Some(value) = comment.strip_prefix("step_size=") {
                    step_size = value
                        .parse()
                        .ok()
                        .filter(|s| *s > 0)
                        .ok_or_else(|| error(format!("bad step_size {:?}", value)))?;
                }
                continue;
            }

            let mut fields = line.split(',');
            let row_id = fields
                .next()
                .and_then(|id| id.parse::<u64>().ok())
                .ok_or_else(|| error(format!("line {}: missing row id", number + 1)))?;
            if row_ids.last().map_or(false, |last| *last >= row_id) {
                return Err(error(format!("line {}: row ids must increase", number + 1)));
            }
            let values = fields
                .map(|f| {
                    f.parse::<f64>()
                        .map_err(|_| error(format!("line {}: bad cell {:?}", number + 1, f)))
                })
                .collect::<Result<Vec<_>, _>>()?;
            match num_cols {
                None if values.is_empty() => return Err(error("rows have no cells".to_string())),
                None => num_cols = Some(values.len()),
                Some(n) if n != values.len() => {
                    return Err(error(format!(
                        "line {}: {} cells, expected {}",
                        number + 1,
                        values.len(),
                        n
                    )))
                }
                Some(_) => {}
            }
            if row_ids.len() == max_rows {
                return Err(error(format!("more than {} rows", max_rows)));
            }
            row_ids.push(row_id);
            cells.extend(values.into_iter().map(|q| fraction_to_bytes(q, cell_bytes)));
        }

        let num_cols = num_cols.ok_or_else(|| error("table is empty".to_string()))?;
        let cells = LookupTable::new(cell_bytes, num_cols, cells)?;
        Ok(Self {
            row_ids,
            bits_of_precision,
            step_size,
            cells: Arc::new(cells),
        })
    }

    pub fn row_ids(&self) -> &[u64] {
        &self.row_ids
    }

    pub fn num_rows(&self) -> usize {
        self.row_ids.len()
    }

    pub fn num_cols(&self) -> usize {
        self.cells.num_cols()
    }

    pub fn bits_of_precision(&self) -> usize {
        self.bits_of_precision
    }

    pub fn step_size(&self) -> u64 {
        self.step_size
    }

    pub fn cells(&self) -> Arc<LookupTable> {
        self.cells.clone()
    }

    /// Row used for `dof` degrees of freedom: the number of row ids after the first
    /// that do not exceed it.
    pub fn row_for(&self, dof: u64) -> usize {
        self.row_ids[1..].iter().filter(|id| **id <= dof).count()
    }

    /// Column for a statistic `x`, clamped to the last column.
    pub fn column_for(&self, x: f64) -> usize {
        let index = (x * 2f64.powi(self.bits_of_precision as i32) / self.step_size as f64).floor();
        (index.max(0.0) as usize).min(self.num_cols() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed_point::bytes_to_fraction;

    const F_TABLE: &str = "#bits_of_precision=2\n#step_size=1\n1, 0.9, 0.5, 0.25\n2, 0.8, 0.4, 0.125\n5, 0.7, 0.3, 0.0625\n";

    #[test]
    fn test_parse() {
        let table = StatTable::parse(F_TABLE, "f.csv", 2, 10).unwrap();
        assert_eq!(table.row_ids(), [1, 2, 5]);
        assert_eq!(table.num_cols(), 3);
        assert_eq!(table.bits_of_precision(), 2);
        assert_eq!(table.step_size(), 1);
        let cells = table.cells();
        assert_eq!(cells.len(), 9);
        assert_eq!(bytes_to_fraction(cells.at(1, 2)), 0.125);
        assert_eq!(bytes_to_fraction(cells.at(2, 0)), (0.7f64 * 65536.0).floor() / 65536.0);
    }

    #[test]
    fn test_row_and_column() {
        let table = StatTable::parse(F_TABLE, "f.csv", 2, 10).unwrap();
        assert_eq!(table.row_for(0), 0);
        assert_eq!(table.row_for(1), 0);
        assert_eq!(table.row_for(2), 1);
        assert_eq!(table.row_for(4), 1);
        assert_eq!(table.row_for(100), 2);
        assert_eq!(table.column_for(0.3), 1);
        assert_eq!(table.column_for(0.5), 2);
        assert_eq!(table.column_for(40.0), 2);
    }

    #[test]
    fn test_defaults_and_errors() {
        let table = StatTable::parse("1,0.5\n", "t.csv", 4, 10).unwrap();
        assert_eq!(table.bits_of_precision(), 5);
        assert_eq!(table.step_size(), 1);

        for bad in [
            "",
            "1,0.5\n1,0.4\n",
            "1,0.5\n2,0.4,0.3\n",
            "x,0.5\n",
            "1,abc\n",
            "#step_size=0\n1,0.5\n",
        ] {
            assert!(
                matches!(StatTable::parse(bad, "t.csv", 4, 10), Err(ConfigError::Table { .. })),
                "{:?}",
                bad
            );
        }
        assert!(StatTable::parse("1,0.5\n2,0.5\n", "t.csv", 4, 1).is_err());
    }
}
