//! Export file discovery and JSONL reading.

use std::fmt;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use walkdir::WalkDir;

use crate::error::HydrateError;
use crate::tweet::RawRecord;

/// Category of an export file, decided by its filename prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExportCategory {
    /// `tweets_*.jsonl`
    Tweets,
    /// `likes_*.jsonl`
    Likes,
    /// `bookmarks_*.jsonl`
    Bookmarks,
    /// Any other `*.jsonl` file.
    Other,
}

impl ExportCategory {
    /// Every category.
    pub const ALL: [Self; 4] = [Self::Tweets, Self::Likes, Self::Bookmarks, Self::Other];

    /// Categorize a file by name. Returns `None` for non-JSONL files.
    #[must_use]
    pub fn of(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let stem = name.strip_suffix(".jsonl")?;
        if stem.starts_with("tweets_") {
            Some(Self::Tweets)
        } else if stem.starts_with("likes_") {
            Some(Self::Likes)
        } else if stem.starts_with("bookmarks_") {
            Some(Self::Bookmarks)
        } else {
            Some(Self::Other)
        }
    }

    /// Lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tweets => "tweets",
            Self::Likes => "likes",
            Self::Bookmarks => "bookmarks",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ExportCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tweets" | "tweet" => Ok(Self::Tweets),
            "likes" | "like" => Ok(Self::Likes),
            "bookmarks" | "bookmark" => Ok(Self::Bookmarks),
            "other" => Ok(Self::Other),
            other => Err(format!(
                "unknown export category '{other}' (expected tweets, likes, bookmarks or other)"
            )),
        }
    }
}

/// List the export files directly inside `dir` that belong to `categories`.
///
/// Not recursive. Results are sorted by path.
pub fn discover_inputs(
    dir: &Path,
    categories: &[ExportCategory],
) -> Result<Vec<PathBuf>, HydrateError> {
    if !dir.is_dir() {
        return Err(HydrateError::Config(format!(
            "input folder {} does not exist or is not a directory",
            dir.display()
        )));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| HydrateError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        match ExportCategory::of(entry.path()) {
            Some(category) if categories.contains(&category) => {
                tracing::debug!(path = %entry.path().display(), %category, "Found export file");
                files.push(entry.into_path());
            }
            _ => {}
        }
    }
    files.sort();
    Ok(files)
}

/// One non-blank line of a JSONL file.
#[derive(Debug)]
pub enum JsonlEntry {
    /// A line holding a JSON object.
    Record { line: usize, record: RawRecord },
    /// A line that is not a JSON object.
    Malformed { line: usize, error: String },
}

/// Iterator over the lines of a JSONL source.
///
/// Blank lines are skipped; undecodable bytes and non-object values come back
/// as [`JsonlEntry::Malformed`] and never stop the iteration. An IO error ends
/// it after being reported once.
pub struct JsonlReader<R> {
    reader: R,
    buf: Vec<u8>,
    line: usize,
    failed: bool,
}

impl<R: BufRead> JsonlReader<R> {
    /// Wrap a buffered reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            line: 0,
            failed: false,
        }
    }
}

impl JsonlReader<std::io::BufReader<std::fs::File>> {
    /// Open a file for reading.
    pub fn open(path: &Path) -> Result<Self, HydrateError> {
        let file = std::fs::File::open(path)?;
        Ok(Self::new(std::io::BufReader::new(file)))
    }
}

impl<R: BufRead> Iterator for JsonlReader<R> {
    type Item = JsonlEntry;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.failed {
                return None;
            }
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => {
                    self.failed = true;
                    self.line += 1;
                    return Some(JsonlEntry::Malformed {
                        line: self.line,
                        error: e.to_string(),
                    });
                }
            }
            self.line += 1;

            if self.buf.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let line = self.line;
            return Some(match serde_json::from_slice::<RawRecord>(&self.buf) {
                Ok(record) if record.is_object() => JsonlEntry::Record { line, record },
                Ok(_) => JsonlEntry::Malformed {
                    line,
                    error: "not a JSON object".to_string(),
                },
                Err(e) => JsonlEntry::Malformed {
                    line,
                    error: e.to_string(),
                },
            });
        }
    }
}
