use bolt_sim_abstract::{TraceError, TraceRecord};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Append-only, line-oriented trace file for a single category.
///
/// Writes go through a buffer; `flush` must be called before the file is
/// read back. Timestamps must not decrease within one sink.
pub struct TraceSink {
    path: PathBuf,
    writer: BufWriter<File>,
    last_time_ns: Option<u64>,
    records: u64,
}

impl TraceSink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, TraceError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|source| TraceError::Create {
            path: path.clone(),
            source,
        })?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            last_time_ns: None,
            records: 0,
        })
    }

    pub fn append(&mut self, record: &TraceRecord) -> Result<(), TraceError> {
        let time_ns = record.time_ns();
        if let Some(last_ns) = self.last_time_ns
            && time_ns < last_ns
        {
            return Err(TraceError::OutOfOrder {
                path: self.path.clone(),
                time_ns,
                last_ns,
            });
        }

        writeln!(self.writer, "{record}").map_err(|source| TraceError::Write {
            path: self.path.clone(),
            source,
        })?;
        self.last_time_ns = Some(time_ns);
        self.records += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), TraceError> {
        self.writer.flush().map_err(|source| TraceError::Flush {
            path: self.path.clone(),
            source,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records_written(&self) -> u64 {
        self.records
    }
}
