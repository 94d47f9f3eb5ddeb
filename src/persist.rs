//! Writing (prompt, reply) pairs to CSV files

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use log::{debug, info, warn};

use crate::config::PersistConfig;
use crate::request::QueryResult;

pub const CSV_EXTENSION: &str = "csv";

/// Writes batch results to collision-free CSV files
#[derive(Debug, Clone, Default)]
pub struct TabularPersister
{   config: PersistConfig
}

impl TabularPersister
{   pub fn new(config: PersistConfig) -> Self
    {   TabularPersister { config }
    }

    pub fn config(&self) -> &PersistConfig
    {   &self.config
    }

    /// The requested directory if it exists, the default otherwise
    pub fn resolve_dir(&self, dir: Option<&Path>) -> PathBuf
    {   match dir
        {   Some(d) if d.is_dir() => d.to_path_buf()
          , Some(d) => {
              warn!(
                "Invalid path given: {}. Saving to {} instead",
                d.display(),
                self.config.default_dir.display()
              );
              self.config.default_dir.clone()
            }
          , None => self.config.default_dir.clone()
        }
    }

    /// Write `rows` and return the path actually used. Existing
    /// files are never overwritten.
    pub fn persist(
      &self
    , rows: &[QueryResult]
    , filename: &str
    , dir: Option<&Path>
    ) -> crate::error::Result<PathBuf>
    {   // Only the final component counts; the file always lands
        // in the resolved directory
        let filename = match Path::new(filename.trim()).file_name()
        {   Some(name) if !name.to_string_lossy().trim().is_empty() => {
              name.to_string_lossy().into_owned()
            }
          , _ => {
              return Err(crate::error::Error::EmptyInput(
                "output file name".to_string()
              ));
            }
        };

        let dir = self.resolve_dir(dir);
        if !dir.exists()
        {   debug!("Creating output directory {}", dir.display());
            fs::create_dir_all(&dir)?;
        }

        let filename = with_csv_extension(filename.trim());
        let (file, path) = create_unique(&dir, &filename)?;
        info!("Saving the data to {}", path.display());

        let mut writer = csv::WriterBuilder::new()
          .has_headers(false)
          .flexible(true)
          .from_writer(file);
        for record in records(rows, self.config.transpose)
        {   writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(path)
    }
}

/// Force the `.csv` extension: appended when missing, swapped (with a
/// warning) when different, left alone when already present.
pub fn with_csv_extension(filename: &str) -> String
{   let path = Path::new(filename);
    match path.extension().and_then(|e| e.to_str())
    {   Some(ext) if ext.eq_ignore_ascii_case(CSV_EXTENSION) => {
          filename.to_string()
        }
      , Some(ext) => {
          warn!(
            "Bad file extension '.{}' passed. Changed to .{}",
            ext, CSV_EXTENSION
          );
          path.with_extension(CSV_EXTENSION)
            .to_string_lossy()
            .into_owned()
        }
      , None => format!("{}.{}", filename, CSV_EXTENSION)
    }
}

/// Create `dir/filename`, or `dir/stem (n).ext` for the first free n
fn create_unique(dir: &Path, filename: &str)
  -> crate::error::Result<(File, PathBuf)>
{   let name = Path::new(filename);
    let stem = name.file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_else(|| filename.to_string());
    let ext = name.extension()
      .map(|e| e.to_string_lossy().into_owned())
      .unwrap_or_else(|| CSV_EXTENSION.to_string());

    let mut attempt = 0usize;
    loop
    {   let candidate = if attempt == 0
        {   dir.join(format!("{}.{}", stem, ext))
        } else
        {   dir.join(format!("{} ({}).{}", stem, attempt, ext))
        };

        match OpenOptions::new()
          .write(true)
          .create_new(true)
          .open(&candidate)
        {   Ok(file) => return Ok((file, candidate))
          , Err(e) if e.kind() == ErrorKind::AlreadyExists => {
              debug!("{} exists, trying next name", candidate.display());
              attempt += 1;
            }
          , Err(e) => return Err(e.into())
        }
    }
}

fn cells(row: &QueryResult) -> Vec<&str>
{   std::iter::once(row.prompt.as_str())
      .chain(row.reply.iter().map(String::as_str))
      .collect()
}

/// CSV records: one per row, or one per column when transposed
fn records(rows: &[QueryResult], transpose: bool) -> Vec<Vec<&str>>
{   let rows: Vec<Vec<&str>> = rows.iter().map(cells).collect();
    if !transpose
    {   return rows;
    }

    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    (0..width)
      .map(|column| {
        rows.iter()
          .map(|row| row.get(column).copied().unwrap_or(""))
          .collect()
      })
      .collect()
}
