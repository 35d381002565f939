use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use audec::auto_decompress;
use log::debug;
use strum::Display;
use thiserror::Error;

use crate::{hepmc2, lhef, parsing::trim_ascii_start};

const ROOT_MAGIC_BYTES: [u8; 4] = [b'r', b'o', b'o', b't'];

/// A raw event record
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventRecord {
    /// HepMC2 record, starting with the `E` line
    HepMC(String),
    /// Les Houches Event record, including the `<event>` tags
    LHEF(String),
}

/// Supported event file formats
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash)]
pub enum FileFormat {
    HepMC2,
    #[strum(serialize = "Les Houches Event Format")]
    Lhef,
}

enum RecordReader {
    HepMC(hepmc2::FileReader),
    LHEF(lhef::FileReader),
}

/// Reader for a single, potentially compressed, event file
///
/// The compression and file format are determined automatically.
pub struct FileReader {
    infile: PathBuf,
    format: FileFormat,
    reader: RecordReader,
}

impl FileReader {
    /// Open the event file at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FileReadError> {
        let infile = path.as_ref().to_path_buf();
        Self::open_inner(&infile)
            .map_err(|source| FileReadError::new(infile, source))
    }

    fn open_inner(infile: &Path) -> Result<Self, ErrorKind> {
        let file = File::open(infile)?;
        let mut r = auto_decompress(BufReader::new(file));
        let bytes = r.fill_buf()?;
        if bytes.starts_with(&ROOT_MAGIC_BYTES) {
            return Err(ErrorKind::RootUnsupported);
        }
        let (format, reader) =
            if trim_ascii_start(bytes).starts_with(b"<LesHouchesEvents") {
                debug!("Read {infile:?} as LHEF file");
                (FileFormat::Lhef, RecordReader::LHEF(lhef::FileReader::new(r)?))
            } else {
                debug!("Read {infile:?} as HepMC file");
                (
                    FileFormat::HepMC2,
                    RecordReader::HepMC(hepmc2::FileReader::new(r)?),
                )
            };
        Ok(Self {
            infile: infile.to_owned(),
            format,
            reader,
        })
    }

    /// The path of the underlying event file
    pub fn path(&self) -> &Path {
        &self.infile
    }

    /// The detected event format
    pub fn format(&self) -> FileFormat {
        self.format
    }
}

impl Iterator for FileReader {
    type Item = Result<EventRecord, FileReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = match &mut self.reader {
            RecordReader::HepMC(r) => r
                .next()
                .map(|r| r.map(EventRecord::HepMC).map_err(ErrorKind::from)),
            RecordReader::LHEF(r) => r
                .next()
                .map(|r| r.map(EventRecord::LHEF).map_err(ErrorKind::from)),
        };
        next.map(|r| r.map_err(|err| FileReadError::new(self.infile.clone(), err)))
    }
}

/// Error reading from an event file
#[derive(Debug, Error)]
#[error("Failed to read events from {infile:?}")]
pub struct FileReadError {
    infile: PathBuf,
    source: ErrorKind,
}

impl FileReadError {
    /// New error for reading from the given file
    pub fn new(infile: PathBuf, source: ErrorKind) -> Self {
        Self { infile, source }
    }

    /// The file that could not be read
    pub fn infile(&self) -> &Path {
        &self.infile
    }
}

/// Reason for failing to read an event file
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// I/O error
    #[error("I/O error")]
    IoError(#[from] std::io::Error),
    /// ROOT files are not supported
    #[error("ROOT ntuple event files are not supported")]
    RootUnsupported,
    /// Error reading a HepMC record
    #[error("Failed to read HepMC record")]
    HepMC(#[from] hepmc2::HepMCError),
    /// Error reading a Les Houches Event record
    #[error("Failed to read Les Houches Event record")]
    LHEF(#[from] lhef::Error),
}

/// Reader for several event files, read one after the other
#[derive(Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CombinedReader<R> {
    readers: Vec<R>,
    current: usize,
}

impl<R> CombinedReader<R> {
    pub fn new(readers: Vec<R>) -> Self {
        Self {
            readers,
            current: 0,
        }
    }

    /// Number of underlying readers
    pub fn len(&self) -> usize {
        self.readers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }
}

impl<R: Iterator> Iterator for CombinedReader<R> {
    type Item = <R as Iterator>::Item;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(reader) = self.readers.get_mut(self.current) {
            let next = reader.next();
            if next.is_some() {
                return next;
            }
            self.current += 1;
        }
        None
    }
}

impl CombinedReader<FileReader> {
    /// Construct a new reader reading from the files with the given names
    ///
    /// Fails if any of the files cannot be opened.
    pub fn from_files<I, P>(files: I) -> Result<Self, FileReadError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let readers: Result<_, _> =
            files.into_iter().map(FileReader::open).collect();
        Ok(Self::new(readers?))
    }
}

/// Expand a file name pattern into the list of matching files
///
/// The files are returned in lexicographic order. It is an error if
/// no file matches.
pub fn expand_pattern(pattern: &str) -> Result<Vec<PathBuf>, PatternError> {
    let paths = glob::glob(pattern).map_err(|source| PatternError::Invalid {
        pattern: pattern.to_owned(),
        source,
    })?;
    let mut files = paths.collect::<Result<Vec<_>, _>>()?;
    files.sort();
    if files.is_empty() {
        return Err(PatternError::NoFiles(pattern.to_owned()));
    }
    Ok(files)
}

/// Error expanding a file name pattern
#[derive(Debug, Error)]
pub enum PatternError {
    /// Malformed pattern
    #[error("Invalid file pattern `{pattern}`")]
    Invalid {
        pattern: String,
        source: glob::PatternError,
    },
    /// Error accessing a matching path
    #[error("Failed to access file")]
    Glob(#[from] glob::GlobError),
    /// No matching files
    #[error("No files match `{0}`")]
    NoFiles(String),
}
