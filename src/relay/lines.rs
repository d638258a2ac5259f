/// Longest line kept while waiting for its newline. Ollama frames are a
/// few hundred bytes.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Reassembles newline-delimited lines from arbitrarily split byte chunks.
///
/// Bytes are only decoded once a full line is available, so a multi-byte
/// character split across two chunks comes out intact. A line that grows
/// past the limit is replaced by a single tagged placeholder and the rest of
/// it, up to the next newline, is discarded.
#[derive(Debug)]
pub struct LineSplitter {
    pending: Vec<u8>,
    scanned: usize,
    discarding: bool,
    max_line: usize,
}

impl Default for LineSplitter {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            pending: Vec::new(),
            scanned: 0,
            discarding: false,
            max_line,
        }
    }

    /// Appends a chunk and returns every line it completed, without the
    /// trailing `\n` / `\r\n`. Blank lines are dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        loop {
            let found = self.pending[self.scanned..].iter().position(|b| *b == b'\n');
            let Some(offset) = found else {
                self.scanned = self.pending.len();
                if self.pending.len() > self.max_line {
                    if !self.discarding {
                        lines.push(format!("oversized line: more than {} bytes", self.max_line));
                        self.discarding = true;
                    }
                    self.pending.clear();
                    self.scanned = 0;
                }
                break;
            };

            let end = self.scanned + offset;
            let raw: Vec<u8> = self.pending.drain(..=end).collect();
            self.scanned = 0;
            if std::mem::take(&mut self.discarding) {
                continue;
            }
            if let Some(line) = decode(&raw[..raw.len() - 1]) {
                lines.push(line);
            }
        }
        lines
    }

    /// Returns whatever is left once the upstream has closed.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        self.scanned = 0;
        if std::mem::take(&mut self.discarding) {
            return None;
        }
        decode(&rest)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Invalid UTF-8 comes back tagged, which the frame parser then rejects as
/// malformed.
fn decode(raw: &[u8]) -> Option<String> {
    let line = match std::str::from_utf8(raw) {
        Ok(line) => line.trim().to_string(),
        Err(_) => format!("invalid utf-8: {}", String::from_utf8_lossy(raw).trim()),
    };
    if line.is_empty() {
        None
    } else {
        Some(line)
    }
}
