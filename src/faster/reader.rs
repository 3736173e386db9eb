//! Sequential reading of `.fast` files

use super::record::{Record, RecordHeader, HEADER_SIZE};
use crate::error::FasterError;
use flate2::read::GzDecoder;
use std::{
    fs::File,
    io::{self, BufRead, BufReader, Read},
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// First two bytes of any gzip stream
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Record-by-record reader of a FASTER data stream
///
/// Iterating yields records until the end of the stream. A stream that ends
/// in the middle of a record is treated like the end of the file, with a
/// warning, as acquisitions that were interrupted commonly leave such a tail.
///
pub struct FasterReader {
    /// Decompressed byte stream
    input: Box<dyn Read + Send>,

    /// Where the data comes from, for error reporting
    path: PathBuf,

    /// Number of bytes consumed so far
    offset: u64,

    /// Truth that the end of the stream (or an error) was reached
    finished: bool,
}
//
impl FasterReader {
    /// Open a `.fast` file, transparently decompressing it if it is gzipped
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FasterError> {
        let path = path.as_ref().to_owned();
        let io_error = |source| FasterError::Io {
            path: path.clone(),
            source,
        };
        let mut buffered = BufReader::new(File::open(&path).map_err(io_error)?);
        let compressed = buffered.fill_buf().map_err(io_error)?.starts_with(&GZIP_MAGIC);
        debug!(path = %path.display(), compressed, "Opened FASTER file");
        let input: Box<dyn Read + Send> = if compressed {
            Box::new(GzDecoder::new(buffered))
        } else {
            Box::new(buffered)
        };
        Ok(Self::from_reader(input, path))
    }

    /// Read records from an arbitrary uncompressed byte stream
    pub fn from_reader(input: Box<dyn Read + Send>, path: PathBuf) -> Self {
        Self {
            input,
            path,
            offset: 0,
            finished: false,
        }
    }

    /// Read as many bytes as possible into `buf`, returning how many were read
    fn read_up_to(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.input.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.offset += filled as u64;
        Ok(filled)
    }

    fn next_record(&mut self) -> Result<Option<Record>, FasterError> {
        let header_offset = self.offset;
        let mut header_bytes = [0u8; HEADER_SIZE];
        let got = self.read_up_to(&mut header_bytes).map_err(|source| FasterError::Io {
            path: self.path.clone(),
            source,
        })?;
        if got == 0 {
            return Ok(None);
        }
        if got < HEADER_SIZE {
            warn!(
                path = %self.path.display(),
                offset = header_offset,
                "Data stream ends inside of a record header, ignoring the tail"
            );
            return Ok(None);
        }
        let header = RecordHeader::parse(&header_bytes, header_offset)?;
        let mut load = vec![0u8; header.load_size];
        let got = self.read_up_to(&mut load).map_err(|source| FasterError::Io {
            path: self.path.clone(),
            source,
        })?;
        if got < header.load_size {
            warn!(
                path = %self.path.display(),
                offset = header_offset,
                "Data stream ends inside of a record payload, ignoring the tail"
            );
            return Ok(None);
        }
        Ok(Some(Record { header, load }))
    }
}
//
impl Iterator for FasterReader {
    type Item = Result<Record, FasterError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let result = self.next_record().transpose();
        if !matches!(result, Some(Ok(_))) {
            self.finished = true;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faster::alias;
    use std::io::Cursor;

    fn reader_over(bytes: Vec<u8>) -> FasterReader {
        FasterReader::from_reader(Box::new(Cursor::new(bytes)), PathBuf::from("memory"))
    }

    #[test]
    fn reads_consecutive_records() {
        let a = Record::new(alias::QDC_X1, 5, 1, vec![1, 0, 0, 0]);
        let b = Record::new(alias::GROUP_COUNTER, 6, 0, vec![0; 8]);
        let mut bytes = a.to_bytes();
        bytes.extend(b.to_bytes());
        let records = reader_over(bytes)
            .collect::<Result<Vec<_>, _>>()
            .expect("valid stream");
        assert_eq!(records, vec![a, b]);
    }

    #[test]
    fn truncated_tail_ends_iteration() {
        let a = Record::new(alias::QDC_X1, 5, 1, vec![1, 0, 0, 0]);
        let mut bytes = a.to_bytes();
        bytes.extend(&a.to_bytes()[..14]);
        let records = reader_over(bytes)
            .collect::<Result<Vec<_>, _>>()
            .expect("tail is dropped silently");
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn corruption_stops_iteration_with_an_error() {
        let a = Record::new(alias::QDC_X1, 5, 1, vec![1, 0, 0, 0]);
        let mut bytes = a.to_bytes();
        bytes.extend([0u8; HEADER_SIZE]);
        bytes.extend(a.to_bytes());
        let mut reader = reader_over(bytes);
        assert!(matches!(reader.next(), Some(Ok(_))));
        assert!(matches!(
            reader.next(),
            Some(Err(FasterError::BadMagic { offset: 16, .. }))
        ));
        assert!(reader.next().is_none());
    }
}
