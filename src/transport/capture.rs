//! Hex transcript of bridge traffic for debugging host drivers.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

/// Direction of a captured chunk, relative to the emulated board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host wrote to the board
    Inbound,
    /// Host read from the board
    Outbound,
}

impl Direction {
    const fn arrow(self) -> char {
        match self {
            Self::Inbound => '>',
            Self::Outbound => '<',
        }
    }
}

/// Thread-safe hex transcript writer for bridge traffic.
///
/// Each chunk becomes one line: `<seconds>.<micros> <arrow> <hex bytes>`.
#[derive(Clone)]
pub struct TrafficRecorder {
    inner: Arc<Mutex<File>>,
}

impl TrafficRecorder {
    /// Create a recorder that writes to the provided path, truncating any existing file.
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(file)),
        })
    }

    /// Record a chunk with the current system timestamp.
    pub fn record(&self, direction: Direction, bytes: &[u8]) -> io::Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }

        let line = format_line(SystemTime::now(), direction, bytes);
        let mut file = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("traffic recorder poisoned"))?;
        file.write_all(line.as_bytes())?;
        file.flush()
    }
}

impl std::fmt::Debug for TrafficRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrafficRecorder").finish_non_exhaustive()
    }
}

/// Open a recorder if a path is configured, logging instead of failing
pub(crate) fn open(path: Option<&Path>) -> Option<TrafficRecorder> {
    let path = path?;
    match TrafficRecorder::create(path) {
        Ok(recorder) => Some(recorder),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "cannot open capture file");
            None
        }
    }
}

/// Record a chunk, logging write failures
pub(crate) fn record(recorder: Option<&TrafficRecorder>, direction: Direction, bytes: &[u8]) {
    if let Some(recorder) = recorder {
        if let Err(err) = recorder.record(direction, bytes) {
            warn!(error = %err, "capture write failed");
        }
    }
}

fn format_line(timestamp: SystemTime, direction: Direction, bytes: &[u8]) -> String {
    let duration = timestamp.duration_since(UNIX_EPOCH).unwrap_or_default();
    let mut line = format!(
        "{}.{:06} {}",
        duration.as_secs(),
        duration.subsec_micros(),
        direction.arrow()
    );
    for byte in bytes {
        let _ = write!(line, " {byte:02x}");
    }
    line.push('\n');
    line
}
