//! Line-oriented query input

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Reads one query key per line from a file or stdin
pub struct QueryReader {
    source: Box<dyn BufRead>,
    name: PathBuf,
}

impl QueryReader {
    /// Open `path`, or stdin when the path is `-`
    pub fn open(path: &Path) -> Result<Self> {
        let source: Box<dyn BufRead> = if path == Path::new("-") {
            Box::new(BufReader::new(io::stdin()))
        } else {
            let file = File::open(path)
                .with_context(|| format!("failed to open input {}", path.display()))?;
            Box::new(BufReader::new(file))
        };

        Ok(Self {
            source,
            name: path.to_path_buf(),
        })
    }

    /// Feed every line to `send`, stopping at the first error.
    ///
    /// Line endings (`\n` or `\r\n`) are stripped; empty lines are keys too.
    /// Bytes that are not valid UTF-8 become U+FFFD instead of failing the
    /// read. Returns the number of lines sent.
    pub fn run<F>(mut self, mut send: F) -> Result<u64>
    where
        F: FnMut(String) -> Result<()>,
    {
        let mut sent = 0u64;
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let read = self
                .source
                .read_until(b'\n', &mut buf)
                .with_context(|| format!("failed to read {}", self.name.display()))?;
            if read == 0 {
                break;
            }

            sent += 1;
            send(decode_line(strip_line_ending(&buf), sent))?;
        }
        Ok(sent)
    }
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn decode_line(line: &[u8], number: u64) -> String {
    match std::str::from_utf8(line) {
        Ok(key) => key.to_string(),
        Err(e) => {
            warn!("Line {} is not valid UTF-8 ({}), counting it lossily", number, e);
            String::from_utf8_lossy(line).into_owned()
        }
    }
}
