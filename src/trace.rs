use std::{
    error::Error,
    fmt, fs,
    io::{self, BufRead, BufReader, Read},
    path::PathBuf,
    thread::{self, JoinHandle},
};

use crossbeam::channel::{Receiver, Sender};
use log::debug;
use xz2::read::XzDecoder;

use crate::cache::AccessType;

// Trace Format
//
//   # comment
//   r 0x7ffd1000
//   w 4096
//
// One reference per line. Files ending in `.xz` are decompressed on the fly.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceEntry {
    pub ty: AccessType,
    pub addr: u64,
}

#[derive(Debug)]
pub enum TraceError {
    Io(io::Error),
    Parse { line: usize, msg: String },
}

impl fmt::Display for TraceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceError::Io(err) => write!(f, "trace read failed: {err}"),
            TraceError::Parse { line, msg } => write!(f, "trace line {line}: {msg}"),
        }
    }
}

impl Error for TraceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TraceError::Io(err) => Some(err),
            TraceError::Parse { .. } => None,
        }
    }
}

impl From<io::Error> for TraceError {
    fn from(err: io::Error) -> Self {
        TraceError::Io(err)
    }
}

fn parse_addr(s: &str) -> Option<u64> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

/// Parses one trace line. `line` is 1-based and only used in errors.
/// Blank and comment lines yield `Ok(None)`.
pub fn parse_line(line: usize, text: &str) -> Result<Option<TraceEntry>, TraceError> {
    let text = text.trim();
    if text.is_empty() || text.starts_with('#') {
        return Ok(None);
    }
    let parse_err = |msg: String| TraceError::Parse { line, msg };

    let mut fields = text.split_whitespace();
    let (Some(kind), Some(addr), None) = (fields.next(), fields.next(), fields.next()) else {
        return Err(parse_err(format!("expected `<r|w> <address>`, got `{text}`")));
    };
    let ty = match kind {
        "r" | "R" | "read" => AccessType::Read,
        "w" | "W" | "write" => AccessType::Write,
        _ => return Err(parse_err(format!("unknown access kind `{kind}`"))),
    };
    let addr = parse_addr(addr).ok_or_else(|| parse_err(format!("bad address `{addr}`")))?;
    Ok(Some(TraceEntry { ty, addr }))
}

fn read_error(line: usize, err: io::Error) -> TraceError {
    match err.kind() {
        io::ErrorKind::InvalidData => TraceError::Parse {
            line,
            msg: "line is not valid UTF-8".to_string(),
        },
        _ => TraceError::Io(err),
    }
}

pub fn parse_reader(reader: impl BufRead) -> Result<Vec<TraceEntry>, TraceError> {
    let mut entries = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|err| read_error(idx + 1, err))?;
        if let Some(entry) = parse_line(idx + 1, &line)? {
            entries.push(entry);
        }
    }
    Ok(entries)
}

pub type TraceBlock = Result<Vec<TraceEntry>, TraceError>;

/// A trace being parsed on a background thread, delivered in blocks.
pub struct Trace {
    rec: Receiver<TraceBlock>,
    _thread: JoinHandle<()>,
}

impl Trace {
    pub fn read(
        path: PathBuf,
        entries_per_block: usize,
        blocks_per_queue: usize,
    ) -> io::Result<Trace> {
        let file = fs::File::open(&path)?;
        let stream: Box<dyn Read + Send> = if path.extension().is_some_and(|ext| ext == "xz") {
            debug!("reading xz trace {}", path.display());
            Box::new(XzDecoder::new(file))
        } else {
            debug!("reading trace {}", path.display());
            Box::new(file)
        };
        let (sender, receiver) = crossbeam::channel::bounded(blocks_per_queue.max(1));

        let entries_per_block = entries_per_block.max(1);
        let t = thread::spawn(move || Trace::run_thread(stream, entries_per_block, sender));

        Ok(Trace {
            rec: receiver,
            _thread: t,
        })
    }

    /// Blocks in trace order. An `Err` block is always the last one.
    pub fn blocks(&self) -> impl Iterator<Item = TraceBlock> + '_ {
        self.rec.iter()
    }

    fn run_thread(stream: Box<dyn Read + Send>, entries_per_block: usize, queue: Sender<TraceBlock>) {
        let reader = BufReader::new(stream);
        let mut buffer = Vec::with_capacity(entries_per_block);
        for (idx, line) in reader.lines().enumerate() {
            let entry = match line {
                Ok(text) => parse_line(idx + 1, &text),
                Err(err) => Err(read_error(idx + 1, err)),
            };
            match entry {
                Ok(Some(entry)) => buffer.push(entry),
                Ok(None) => {}
                Err(err) => {
                    if !buffer.is_empty() && queue.send(Ok(buffer)).is_err() {
                        return;
                    }
                    let _ = queue.send(Err(err));
                    return;
                }
            }
            if buffer.len() == entries_per_block {
                let full = std::mem::replace(&mut buffer, Vec::with_capacity(entries_per_block));
                if queue.send(Ok(full)).is_err() {
                    return;
                }
            }
        }
        if !buffer.is_empty() {
            let _ = queue.send(Ok(buffer));
        }
    }
}
