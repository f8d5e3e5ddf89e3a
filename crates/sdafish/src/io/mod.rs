//! Read I/O: FASTQ/FASTA parsing and paired-stream plumbing.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::Result;

/// A sequencing read (raw bytes, no validation). `qual` is empty for FASTA
/// input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRecord {
    pub header: Vec<u8>,
    pub seq: Vec<u8>,
    pub qual: Vec<u8>,
}

/// Streaming source of reads.
pub trait ReadSource {
    fn next_record(&mut self) -> Option<Result<ReadRecord>>;
}

/// A buffered FASTQ reader for plain text input.
pub struct FastqReader<R: BufRead> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: BufRead> FastqReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(256),
        }
    }

    fn read_line(&mut self) -> Result<Option<Vec<u8>>> {
        self.buf.clear();
        let bytes = self.reader.read_until(b'\n', &mut self.buf)?;
        if bytes == 0 {
            return Ok(None);
        }
        if self.buf.ends_with(b"\n") {
            self.buf.pop();
            if self.buf.ends_with(b"\r") {
                self.buf.pop();
            }
        }
        Ok(Some(self.buf.clone()))
    }
}

impl<R: BufRead> ReadSource for FastqReader<R> {
    fn next_record(&mut self) -> Option<Result<ReadRecord>> {
        let header = match self.read_line() {
            Ok(Some(line)) => line,
            Ok(None) => return None,
            Err(err) => return Some(Err(err)),
        };
        let seq = match self.read_line() {
            Ok(Some(line)) => line,
            Ok(None) => return Some(Err(Error::InvalidFormat("truncated FASTQ".into()))),
            Err(err) => return Some(Err(err)),
        };
        let plus = match self.read_line() {
            Ok(Some(line)) => line,
            Ok(None) => return Some(Err(Error::InvalidFormat("truncated FASTQ".into()))),
            Err(err) => return Some(Err(err)),
        };
        if !plus.starts_with(b"+") {
            return Some(Err(Error::InvalidFormat(
                "malformed FASTQ separator line".into(),
            )));
        }
        let qual = match self.read_line() {
            Ok(Some(line)) => line,
            Ok(None) => return Some(Err(Error::InvalidFormat("truncated FASTQ".into()))),
            Err(err) => return Some(Err(err)),
        };

        Some(Ok(ReadRecord { header, seq, qual }))
    }
}

/// A buffered FASTA reader; sequences may span multiple lines.
pub struct FastaReader<R: BufRead> {
    reader: R,
    pending_header: Option<Vec<u8>>,
    buf: Vec<u8>,
}

impl<R: BufRead> FastaReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            pending_header: None,
            buf: Vec::with_capacity(256),
        }
    }

    fn read_line(&mut self) -> Result<Option<Vec<u8>>> {
        self.buf.clear();
        let bytes = self.reader.read_until(b'\n', &mut self.buf)?;
        if bytes == 0 {
            return Ok(None);
        }
        if self.buf.ends_with(b"\n") {
            self.buf.pop();
            if self.buf.ends_with(b"\r") {
                self.buf.pop();
            }
        }
        Ok(Some(self.buf.clone()))
    }
}

impl<R: BufRead> ReadSource for FastaReader<R> {
    fn next_record(&mut self) -> Option<Result<ReadRecord>> {
        let header = match self.pending_header.take() {
            Some(header) => header,
            None => loop {
                match self.read_line() {
                    Ok(Some(line)) => {
                        if line.is_empty() {
                            continue;
                        }
                        if !line.starts_with(b">") {
                            return Some(Err(Error::InvalidFormat(
                                "expected FASTA header".into(),
                            )));
                        }
                        break line;
                    }
                    Ok(None) => return None,
                    Err(err) => return Some(Err(err)),
                }
            },
        };

        let mut seq = Vec::new();
        loop {
            match self.read_line() {
                Ok(Some(line)) => {
                    if line.starts_with(b">") {
                        self.pending_header = Some(line);
                        break;
                    }
                    seq.extend_from_slice(&line);
                }
                Ok(None) => break,
                Err(err) => return Some(Err(err)),
            }
        }

        Some(Ok(ReadRecord {
            header,
            seq,
            qual: Vec::new(),
        }))
    }
}

/// Open a reads file, sniffing FASTA vs FASTQ from the first byte.
pub fn open_reader(path: &Path) -> Result<Box<dyn ReadSource + Send>> {
    let file = File::open(path).map_err(|_| Error::MissingFile(path.to_path_buf()))?;
    let mut reader = BufReader::new(file);
    let first = {
        let buf = reader.fill_buf()?;
        buf.first().copied()
    };
    match first {
        Some(b'>') => Ok(Box::new(FastaReader::new(reader))),
        Some(b'@') => Ok(Box::new(FastqReader::new(reader))),
        Some(other) => Err(Error::InvalidFormat(format!(
            "unrecognized reads file {}: starts with {:?}",
            path.display(),
            other as char
        ))),
        None => Ok(Box::new(FastqReader::new(reader))),
    }
}

/// Concatenates several reads files into one stream, in order.
pub struct MultiFileSource {
    paths: Vec<PathBuf>,
    next_path: usize,
    current: Option<Box<dyn ReadSource + Send>>,
}

impl MultiFileSource {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            next_path: 0,
            current: None,
        }
    }
}

impl ReadSource for MultiFileSource {
    fn next_record(&mut self) -> Option<Result<ReadRecord>> {
        loop {
            if self.current.is_none() {
                if self.next_path >= self.paths.len() {
                    return None;
                }
                let path = &self.paths[self.next_path];
                self.next_path += 1;
                match open_reader(path) {
                    Ok(reader) => self.current = Some(reader),
                    Err(err) => return Some(Err(err)),
                }
            }
            match self.current.as_mut().and_then(|r| r.next_record()) {
                Some(record) => return Some(record),
                None => self.current = None,
            }
        }
    }
}

/// Zips the two mate streams of a paired-end library.
pub struct PairedReader {
    left: MultiFileSource,
    right: MultiFileSource,
}

impl PairedReader {
    pub fn new(mates1: Vec<PathBuf>, mates2: Vec<PathBuf>) -> Self {
        Self {
            left: MultiFileSource::new(mates1),
            right: MultiFileSource::new(mates2),
        }
    }

    /// Next read pair, or an error if the two sides fall out of step.
    pub fn next_pair(&mut self) -> Option<Result<(ReadRecord, ReadRecord)>> {
        match (self.left.next_record(), self.right.next_record()) {
            (None, None) => None,
            (Some(_), None) | (None, Some(_)) => Some(Err(Error::InvalidFormat(
                "paired read streams have different lengths".into(),
            ))),
            (Some(Ok(a)), Some(Ok(b))) => Some(Ok((a, b))),
            (Some(Err(err)), _) | (_, Some(Err(err))) => Some(Err(err)),
        }
    }
}
