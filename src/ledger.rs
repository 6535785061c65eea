use std::collections::HashMap;
use std::fs;
use std::io::{self, BufWriter, Write};

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::domain::{DownloadJob, JobStatus, columns, parse_size, parse_timestamp};
use crate::error::FetchError;

/// Tab-separated requests file holding one row per download job.
///
/// The header is read at load time, so the column set is whatever the file
/// declares. Rows are held in memory, indexed by `filename`, and every field
/// update rewrites the whole file through a temp file and a rename.
#[derive(Debug)]
pub struct Ledger {
    path: Utf8PathBuf,
    /// Header cells exactly as read, written back unchanged.
    columns: Vec<String>,
    /// Trimmed header cells used for lookups.
    names: Vec<String>,
    rows: Vec<Vec<String>>,
    index: HashMap<String, usize>,
    key_column: usize,
}

impl Ledger {
    pub fn open(path: &Utf8Path) -> Result<Self, FetchError> {
        if !path.as_std_path().is_file() {
            return Err(FetchError::LedgerMissing(path.to_path_buf()));
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| FetchError::Filesystem(format!("read {path}: {err}")))?;
        Self::parse(path, &content)
    }

    fn parse(path: &Utf8Path, content: &str) -> Result<Self, FetchError> {
        let mut lines = content.lines();
        let header = lines
            .next()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.trim().is_empty())
            .ok_or_else(|| FetchError::EmptyLedger(path.to_path_buf()))?;
        let columns: Vec<String> = header.split('\t').map(str::to_string).collect();
        let names: Vec<String> = columns.iter().map(|name| name.trim().to_string()).collect();

        for required in columns::REQUIRED {
            if !names.iter().any(|name| name == required) {
                return Err(FetchError::MissingColumn {
                    path: path.to_path_buf(),
                    column: required.to_string(),
                });
            }
        }
        let key_column = names
            .iter()
            .position(|name| name == columns::FILENAME)
            .unwrap_or(0);

        let mut rows = Vec::new();
        let mut index = HashMap::new();
        for line in lines {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let mut fields: Vec<String> = line.split('\t').map(str::to_string).collect();
            if fields.len() < columns.len() {
                fields.resize(columns.len(), String::new());
            }
            let key = fields[key_column].clone();
            // Rows without a filename are carried through but never indexed.
            if key.is_empty() {
                rows.push(fields);
                continue;
            }
            if index.insert(key.clone(), rows.len()).is_some() {
                return Err(FetchError::DuplicateRow {
                    path: path.to_path_buf(),
                    name: key,
                });
            }
            rows.push(fields);
        }

        debug!(path = %path, rows = rows.len(), columns = columns.len(), "loaded ledger");
        Ok(Self {
            path: path.to_path_buf(),
            columns,
            names,
            rows,
            index,
            key_column,
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Column names and padded rows, in file order.
    pub fn load(&self) -> (&[String], &[Vec<String>]) {
        (&self.columns, &self.rows)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.names.iter().position(|name| name == column)
    }

    pub fn field(&self, row_key: &str, column: &str) -> Option<&str> {
        let row = *self.index.get(row_key)?;
        let col = self.column_index(column)?;
        self.rows[row].get(col).map(String::as_str)
    }

    /// Decodes every row into a job, preserving file order.
    pub fn jobs(&self) -> Vec<DownloadJob> {
        self.rows
            .iter()
            .filter(|row| !row[self.key_column].is_empty())
            .map(|row| self.decode(row))
            .collect()
    }

    fn decode(&self, row: &[String]) -> DownloadJob {
        let get = |column: &str| {
            self.column_index(column)
                .and_then(|idx| row.get(idx))
                .map(String::as_str)
                .unwrap_or("")
        };
        DownloadJob {
            name: row[self.key_column].clone(),
            uuid: get(columns::ANALYSIS_ID).trim().to_string(),
            size: parse_size(get(columns::FILES_SIZE)),
            checksum: get(columns::CHECKSUM).trim().to_string(),
            start_time: parse_timestamp(get(columns::START_TIME)),
            end_time: parse_timestamp(get(columns::END_TIME)),
            status: get(columns::STATUS).parse().unwrap_or(JobStatus::Unknown),
            disease: get(columns::DISEASE).trim().to_string(),
            barcode: get(columns::BARCODE).trim().to_string(),
            library: get(columns::LIBRARY_TYPE).trim().to_string(),
            platform: get(columns::PLATFORM_NAME).trim().to_string(),
        }
    }

    /// Sets one field of one row and durably rewrites the file before returning.
    pub fn update_field(
        &mut self,
        row_key: &str,
        column: &str,
        value: &str,
    ) -> Result<(), FetchError> {
        self.prepare_update(row_key, column, value)?.commit()
    }

    /// Writes the updated ledger to a synced temp file next to the original
    /// without replacing it. Dropping the returned value discards the temp
    /// file and leaves both the file on disk and the in-memory rows untouched.
    pub fn prepare_update(
        &mut self,
        row_key: &str,
        column: &str,
        value: &str,
    ) -> Result<PendingUpdate<'_>, FetchError> {
        let row = *self
            .index
            .get(row_key)
            .ok_or_else(|| FetchError::UnknownRow(row_key.to_string()))?;
        let col = self
            .column_index(column)
            .ok_or_else(|| FetchError::UnknownColumn(column.to_string()))?;
        let value = value.replace(['\t', '\n', '\r'], " ");

        let parent = self
            .path
            .parent()
            .filter(|dir| !dir.as_str().is_empty())
            .unwrap_or(Utf8Path::new("."));
        let temp = tempfile::Builder::new()
            .prefix(".bamfetch-ledger")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| FetchError::LedgerWrite(format!("create temp in {parent}: {err}")))?;
        self.write_rows(&temp, row, col, &value)
            .map_err(|err| FetchError::LedgerWrite(format!("write {}: {err}", self.path)))?;

        Ok(PendingUpdate {
            ledger: self,
            temp,
            row,
            col,
            value,
        })
    }

    fn write_rows(
        &self,
        temp: &NamedTempFile,
        row: usize,
        col: usize,
        value: &str,
    ) -> io::Result<()> {
        let mut writer = BufWriter::new(temp.as_file());
        writeln!(writer, "{}", self.columns.join("\t"))?;
        for (idx, fields) in self.rows.iter().enumerate() {
            if idx == row {
                let mut updated = fields.clone();
                updated[col] = value.to_string();
                writeln!(writer, "{}", updated.join("\t"))?;
            } else {
                writeln!(writer, "{}", fields.join("\t"))?;
            }
        }
        writer.flush()?;
        drop(writer);
        temp.as_file().sync_all()
    }
}

/// A fully written, not yet installed ledger rewrite.
#[must_use = "the ledger is only updated once the rewrite is committed"]
pub struct PendingUpdate<'a> {
    ledger: &'a mut Ledger,
    temp: NamedTempFile,
    row: usize,
    col: usize,
    value: String,
}

impl PendingUpdate<'_> {
    /// Renames the temp file over the ledger and syncs the directory entry.
    /// A failed directory sync is reported even though the rename happened.
    pub fn commit(self) -> Result<(), FetchError> {
        let PendingUpdate {
            ledger,
            temp,
            row,
            col,
            value,
        } = self;
        let path = ledger.path.clone();
        temp.persist(path.as_std_path())
            .map_err(|err| FetchError::LedgerWrite(format!("replace {path}: {}", err.error)))?;
        ledger.rows[row][col] = value;
        sync_parent_dir(&path)
            .map_err(|err| FetchError::LedgerWrite(format!("sync directory of {path}: {err}")))
    }
}

fn sync_parent_dir(path: &Utf8Path) -> io::Result<()> {
    let parent = path
        .parent()
        .filter(|dir| !dir.as_str().is_empty())
        .unwrap_or(Utf8Path::new("."));
    fs::File::open(parent.as_std_path())?.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> String {
        let mut cols: Vec<&str> = columns::REQUIRED.to_vec();
        cols.push("notes");
        cols.join("\t")
    }

    #[test]
    fn directory_sync_failure_is_reported() {
        assert!(sync_parent_dir(Utf8Path::new("/nonexistent-bamfetch-dir/ledger.tsv")).is_err());
        assert!(sync_parent_dir(Utf8Path::new("ledger.tsv")).is_ok());
    }

    #[test]
    fn short_rows_are_padded() {
        let content = format!("{}\nsample.bam\tuuid-1\n", header());
        let ledger = Ledger::parse(Utf8Path::new("mem.tsv"), &content).unwrap();
        let (cols, rows) = ledger.load();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].len(), cols.len());
        assert_eq!(ledger.field("sample.bam", "notes"), Some(""));
    }

    #[test]
    fn missing_required_column_is_rejected() {
        let err = Ledger::parse(Utf8Path::new("mem.tsv"), "filename\tstatus\n").unwrap_err();
        assert!(matches!(err, FetchError::MissingColumn { .. }));
        assert!(err.is_configuration());
    }

    #[test]
    fn duplicate_row_keys_are_rejected() {
        let content = format!("{}\na.bam\nb.bam\na.bam\n", header());
        let err = Ledger::parse(Utf8Path::new("mem.tsv"), &content).unwrap_err();
        assert!(matches!(err, FetchError::DuplicateRow { name, .. } if name == "a.bam"));
    }

    #[test]
    fn decode_reads_named_columns() {
        let mut fields = vec![""; columns::REQUIRED.len()];
        fields[0] = "a.bam";
        fields[1] = "uuid-a";
        fields[2] = "2048.0";
        fields[6] = "Failed";
        let content = format!("{}\n{}\n", header(), fields.join("\t"));
        let ledger = Ledger::parse(Utf8Path::new("mem.tsv"), &content).unwrap();
        let job = &ledger.jobs()[0];
        assert_eq!(job.uuid, "uuid-a");
        assert_eq!(job.size, 2048);
        assert_eq!(job.status, JobStatus::Failed);
    }
}
