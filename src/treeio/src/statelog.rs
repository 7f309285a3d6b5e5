//! Tab-delimited MCMC state log: one header row of column names, one row per
//! sample. Mirrors the flat table ecoevolity writes for its own state log,
//! which `ecoevolity summarize`-equivalent tooling (here, the `Summarize`
//! CLI subcommand) reads back.

use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use crate::TreeIoError;

pub struct StateLogWriter<W: Write> {
    writer: W,
    columns: Vec<String>,
    header_written: bool,
}

impl<W: Write> StateLogWriter<W> {
    pub fn new(writer: W, columns: Vec<String>) -> Self {
        Self { writer, columns, header_written: false }
    }

    pub fn write_row(&mut self, values: &[f64]) -> Result<(), TreeIoError> {
        if values.len() != self.columns.len() {
            return Err(TreeIoError::Nexus {
                path: Path::new("<state log>").to_path_buf(),
                reason: format!(
                    "expected {} columns, got {} values",
                    self.columns.len(),
                    values.len()
                ),
            });
        }
        if !self.header_written {
            writeln!(self.writer, "{}", self.columns.join("\t"))?;
            self.header_written = true;
        }
        let row: Vec<String> = values.iter().map(|v| format!("{v}")).collect();
        writeln!(self.writer, "{}", row.join("\t"))?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct StateLog {
    pub columns: Vec<String>,
    /// `samples[column_index][row_index]`
    pub samples: Vec<Vec<f64>>,
}

impl StateLog {
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.iter().position(|c| c == name).map(|i| self.samples[i].as_slice())
    }
}

pub fn read(path: &Path) -> Result<StateLog, TreeIoError> {
    let file = std::fs::File::open(path).map_err(|_| TreeIoError::MissingFile(path.to_path_buf()))?;
    let mut lines = BufReader::new(file).lines();
    let header = lines
        .next()
        .ok_or_else(|| TreeIoError::Nexus { path: path.to_path_buf(), reason: "empty state log".into() })??;
    let columns: Vec<String> = header.split('\t').map(str::to_string).collect();
    let mut samples = vec![Vec::new(); columns.len()];
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        for (i, field) in line.split('\t').enumerate() {
            let value = field.parse::<f64>().map_err(|e| TreeIoError::Nexus {
                path: path.to_path_buf(),
                reason: format!("non-numeric value {field:?} in column {i}: {e}"),
            })?;
            samples[i].push(value);
        }
    }
    Ok(StateLog { columns, samples })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_header_once_then_rows() {
        let mut buf = Vec::new();
        {
            let mut writer = StateLogWriter::new(&mut buf, vec!["a".into(), "b".into()]);
            writer.write_row(&[1.0, 2.0]).unwrap();
            writer.write_row(&[3.0, 4.0]).unwrap();
        }
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, "a\tb\n1\t2\n3\t4\n");
    }

    #[test]
    fn round_trips_through_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.tsv");
        {
            let file = std::fs::File::create(&path).unwrap();
            let mut writer = StateLogWriter::new(file, vec!["height".into()]);
            writer.write_row(&[0.5]).unwrap();
            writer.write_row(&[0.7]).unwrap();
        }
        let log = read(&path).unwrap();
        assert_eq!(log.column("height").unwrap(), &[0.5, 0.7]);
    }
}
