//! Output files.
//!
//! Every file is written to a temporary file next to its destination and
//! renamed into place once complete, so a failed run never leaves a
//! half-written `part_<i>.sql` behind. A batch set is committed as a whole.

use crate::batch::{part_file_name, Batch};
use crate::error::{Result, StagerError};
use crate::rewriter::RewrittenStatement;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempPath};

pub const WRITER_BUFFER_SIZE: usize = 256 * 1024;
pub const STMT_BUFFER_COUNT: usize = 100;

/// Buffered writer for one output file, persisted on [`finish`](Self::finish).
pub struct PartWriter {
    destination: PathBuf,
    writer: BufWriter<NamedTempFile>,
    write_count: usize,
    max_stmt_buffer: usize,
}

impl PartWriter {
    pub fn new(destination: &Path) -> Result<Self> {
        let dir = match destination.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let file = NamedTempFile::new_in(dir).map_err(|e| StagerError::io(dir, e))?;

        Ok(Self {
            destination: destination.to_path_buf(),
            writer: BufWriter::with_capacity(WRITER_BUFFER_SIZE, file),
            write_count: 0,
            max_stmt_buffer: STMT_BUFFER_COUNT,
        })
    }

    pub fn write_header(&mut self, line: &str) -> Result<()> {
        writeln!(self.writer, "-- {}", line).map_err(|e| self.io_error(e))
    }

    pub fn write_statement(&mut self, stmt: &str) -> Result<()> {
        self.writer
            .write_all(stmt.as_bytes())
            .and_then(|_| self.writer.write_all(b"\n"))
            .map_err(|e| StagerError::io(&self.destination, e))?;

        self.write_count += 1;
        if self.write_count >= self.max_stmt_buffer {
            self.write_count = 0;
            self.writer.flush().map_err(|e| self.io_error(e))?;
        }

        Ok(())
    }

    /// Flush and atomically move the file into place.
    pub fn finish(self) -> Result<PathBuf> {
        self.into_staged()?.persist()
    }

    /// Flush and sync without publishing. The temporary file is removed if
    /// the result is dropped unpersisted.
    pub fn into_staged(self) -> Result<StagedFile> {
        let destination = self.destination;
        let file = self
            .writer
            .into_inner()
            .map_err(|e| StagerError::io(&destination, e.into_error()))?;
        file.as_file()
            .sync_all()
            .map_err(|e| StagerError::io(&destination, e))?;
        Ok(StagedFile { destination, file })
    }

    fn io_error(&self, e: std::io::Error) -> StagerError {
        StagerError::io(&self.destination, e)
    }
}

/// A complete, synced file waiting to be renamed over its destination.
pub struct StagedFile {
    destination: PathBuf,
    file: NamedTempFile,
}

impl StagedFile {
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn persist(self) -> Result<PathBuf> {
        let destination = self.destination;
        self.file
            .persist(&destination)
            .map_err(|e| StagerError::io(&destination, e.error))?;
        Ok(destination)
    }
}

/// Destination replaced during a commit, with the previous file parked
/// beside it until the whole set is in place.
struct Replaced {
    destination: PathBuf,
    previous: Option<TempPath>,
}

/// Writes a batch set as `part_1.sql ..= part_N.sql` into one directory.
///
/// Every part is written and synced before any of them is renamed into
/// place, and a failed rename puts the earlier parts back, so a run either
/// replaces the whole set or leaves the directory as it found it.
pub struct BatchWriter {
    output_dir: PathBuf,
    header: bool,
}

impl BatchWriter {
    pub fn new(output_dir: PathBuf) -> Self {
        Self {
            output_dir,
            header: false,
        }
    }

    pub fn with_header(mut self, header: bool) -> Self {
        self.header = header;
        self
    }

    pub fn ensure_output_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.output_dir).map_err(|e| StagerError::io(&self.output_dir, e))
    }

    /// Write every batch, empty ones included. Returns the written paths in
    /// batch order.
    pub fn write_batches(&self, batches: &[Batch]) -> Result<Vec<PathBuf>> {
        self.ensure_output_dir()?;

        let total = batches.len();
        let mut staged = Vec::with_capacity(total);
        for batch in batches {
            let path = self.output_dir.join(batch.file_name());
            let mut writer = PartWriter::new(&path)?;
            if self.header {
                writer.write_header(&format!(
                    "dump-stager part {} of {} ({} statements)",
                    batch.index,
                    total,
                    batch.len()
                ))?;
            }
            for stmt in &batch.statements {
                writer.write_statement(&stmt.text)?;
            }
            staged.push(writer.into_staged()?);
        }

        for file in &staged {
            let destination = file.destination();
            if destination.exists() && !destination.is_file() {
                return Err(StagerError::io(
                    destination,
                    io::Error::other("destination exists and is not a regular file"),
                ));
            }
        }

        let written = self.commit(staged)?;
        for stale in self.stale_parts(total) {
            tracing::warn!(path = %stale.display(), "stale part file from an earlier run");
        }
        Ok(written)
    }

    /// Part files numbered above `total`, left over from an earlier run with
    /// more batches. Sorted by part number.
    pub fn stale_parts(&self, total: usize) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.output_dir) else {
            return Vec::new();
        };
        let mut stale: Vec<(usize, PathBuf)> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                let index = name
                    .to_str()?
                    .strip_prefix("part_")?
                    .strip_suffix(".sql")?
                    .parse::<usize>()
                    .ok()?;
                (index > total && part_file_name(index) == name.to_str()?)
                    .then(|| (index, entry.path()))
            })
            .collect();
        stale.sort_unstable_by_key(|(index, _)| *index);
        stale.into_iter().map(|(_, path)| path).collect()
    }

    fn commit(&self, staged: Vec<StagedFile>) -> Result<Vec<PathBuf>> {
        let mut replaced: Vec<Replaced> = Vec::with_capacity(staged.len());
        for file in staged {
            match self.replace(file) {
                Ok(done) => replaced.push(done),
                Err(e) => {
                    rollback(replaced);
                    return Err(e);
                }
            }
        }
        // dropping the parked previous files deletes them
        Ok(replaced.into_iter().map(|r| r.destination).collect())
    }

    fn replace(&self, file: StagedFile) -> Result<Replaced> {
        let destination = file.destination.clone();
        let previous = if destination.is_file() {
            let parked = tempfile::Builder::new()
                .prefix(".replaced-")
                .tempfile_in(&self.output_dir)
                .map_err(|e| StagerError::io(&self.output_dir, e))?
                .into_temp_path();
            fs::rename(&destination, &parked).map_err(|e| StagerError::io(&destination, e))?;
            Some(parked)
        } else {
            None
        };

        match file.persist() {
            Ok(destination) => Ok(Replaced {
                destination,
                previous,
            }),
            Err(e) => {
                if previous.is_some() {
                    rollback(vec![Replaced {
                        destination,
                        previous,
                    }]);
                }
                Err(e)
            }
        }
    }
}

/// Undo [`BatchWriter::commit`] in reverse order. Best effort: failures are
/// logged and the remaining entries are still restored.
fn rollback(replaced: Vec<Replaced>) {
    for entry in replaced.into_iter().rev() {
        let restored = match entry.previous {
            Some(previous) => previous.persist(&entry.destination).map_err(|e| e.error),
            None => match fs::remove_file(&entry.destination) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            },
        };
        if let Err(e) = restored {
            tracing::error!(
                path = %entry.destination.display(),
                error = %e,
                "could not restore part file"
            );
        }
    }
}

/// Write the whole sequence to one file.
pub fn write_flattened(path: &Path, statements: &[RewrittenStatement]) -> Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| StagerError::io(parent, e))?;
    }
    let mut writer = PartWriter::new(path)?;
    for stmt in statements {
        writer.write_statement(&stmt.text)?;
    }
    writer.finish()
}

/// Write the whole sequence to any sink, e.g. stdout.
pub fn write_flattened_to<W: Write>(
    out: &mut W,
    statements: &[RewrittenStatement],
) -> std::io::Result<()> {
    for stmt in statements {
        out.write_all(stmt.text.as_bytes())?;
        out.write_all(b"\n")?;
    }
    out.flush()
}
