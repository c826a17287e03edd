use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use log::{debug, trace};

use crate::error::CandidateError;

const OPEN_RETRIES: u32 = 6;

/// Whether `err` means the process or system ran out of file descriptors
/// (`EMFILE` / `ENFILE`).
pub fn is_descriptor_exhaustion(err: &io::Error) -> bool {
    cfg!(unix) && matches!(err.raw_os_error(), Some(23) | Some(24))
}

/// Opens `path`, backing off while descriptors are exhausted.
fn open_file(path: &Path) -> io::Result<File> {
    let mut attempt = 0;
    loop {
        match File::open(path) {
            Err(e) if is_descriptor_exhaustion(&e) && attempt < OPEN_RETRIES => {
                debug!("Out of file descriptors opening '{}', retrying", path.display());
                thread::sleep(Duration::from_millis(5 << attempt));
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// Sequential block reader over one file.
///
/// The reader trusts the size recorded when the file was listed: it never
/// reads past it, and a file that has shrunk since then fails with
/// [`CandidateError::Read`]. The last block is zero-padded to the full
/// block size. [`FileReader::suspend`] gives the descriptor back between
/// reads; the next read reopens the file at the same offset.
pub struct FileReader {
    path: PathBuf,
    file: Option<File>,
    declared_size: u64,
    offset: u64,
    blocks_read: u64,
    buffer: Box<[u8]>,
}

impl FileReader {
    pub fn open(
        path: &Path,
        declared_size: u64,
        block_size: usize,
    ) -> Result<Self, CandidateError> {
        let file = open_file(path).map_err(|source| CandidateError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        trace!("Opened '{}' ({} bytes)", path.display(), declared_size);
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            declared_size,
            offset: 0,
            blocks_read: 0,
            buffer: vec![0u8; block_size.max(1)].into_boxed_slice(),
        })
    }

    fn reopen(&self) -> Result<File, CandidateError> {
        let mut file = open_file(&self.path).map_err(|source| CandidateError::Open {
            path: self.path.clone(),
            source,
        })?;
        file.seek(SeekFrom::Start(self.offset))
            .map_err(|source| CandidateError::Read {
                path: self.path.clone(),
                offset: self.offset,
                source,
            })?;
        Ok(file)
    }

    /// Reads the next block, or returns `None` once the declared size has
    /// been consumed.
    pub fn next_block(&mut self) -> Result<Option<&[u8]>, CandidateError> {
        let remaining = self.declared_size - self.offset;
        if remaining == 0 {
            return Ok(None);
        }

        let file = match self.file.take() {
            Some(file) => file,
            None => self.reopen()?,
        };
        let file = self.file.insert(file);

        let len = remaining.min(self.buffer.len() as u64) as usize;
        self.buffer[len..].fill(0);
        file.read_exact(&mut self.buffer[..len])
            .map_err(|source| CandidateError::Read {
                path: self.path.clone(),
                offset: self.offset,
                source,
            })?;

        self.offset += len as u64;
        self.blocks_read += 1;
        Ok(Some(&self.buffer))
    }

    /// Releases the descriptor while keeping the read position.
    pub fn suspend(&mut self) {
        self.file = None;
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn bytes_read(&self) -> u64 {
        self.offset
    }

    pub fn blocks_read(&self) -> u64 {
        self.blocks_read
    }

    pub fn is_exhausted(&self) -> bool {
        self.offset == self.declared_size
    }

    /// Releases the file descriptor.
    pub fn close(self) {
        trace!(
            "Closing '{}' after {} block(s)",
            self.path.display(),
            self.blocks_read
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn collect_blocks(reader: &mut FileReader) -> Vec<Vec<u8>> {
        let mut blocks = Vec::new();
        while let Some(block) = reader.next_block().unwrap() {
            blocks.push(block.to_vec());
        }
        blocks
    }

    #[test]
    fn pads_the_last_block_with_zeros() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("world.txt");
        fs::write(&path, b"Hello, World\n").unwrap();

        let mut reader = FileReader::open(&path, 13, 5).unwrap();
        let blocks = collect_blocks(&mut reader);

        assert_eq!(
            blocks,
            vec![b"Hello".to_vec(), b", Wor".to_vec(), b"ld\n\0\0".to_vec()]
        );
        assert_eq!(reader.blocks_read(), 3);
        assert_eq!(reader.bytes_read(), 13);
        assert!(reader.is_exhausted());
        assert!(reader.next_block().unwrap().is_none());
    }

    #[test]
    fn exact_multiple_has_no_padding_block() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ten.bin");
        fs::write(&path, b"0123456789").unwrap();

        let mut reader = FileReader::open(&path, 10, 5).unwrap();
        let blocks = collect_blocks(&mut reader);

        assert_eq!(blocks.len(), 2);
        assert_eq!(reader.blocks_read(), 2);
    }

    #[test]
    fn empty_file_is_exhausted_immediately() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty");
        fs::write(&path, b"").unwrap();

        let mut reader = FileReader::open(&path, 0, 4).unwrap();
        assert!(reader.is_exhausted());
        assert!(reader.next_block().unwrap().is_none());
        assert_eq!(reader.blocks_read(), 0);
    }

    #[test]
    fn never_reads_past_declared_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("grown.txt");
        fs::write(&path, b"abcdefgh").unwrap();

        let mut reader = FileReader::open(&path, 6, 4).unwrap();
        let blocks = collect_blocks(&mut reader);
        assert_eq!(blocks, vec![b"abcd".to_vec(), b"ef\0\0".to_vec()]);
    }

    #[test]
    fn shrunk_file_reports_read_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shrunk.txt");
        fs::write(&path, b"abc").unwrap();

        let mut reader = FileReader::open(&path, 10, 4).unwrap();
        let err = reader.next_block().unwrap_err();
        assert!(matches!(err, CandidateError::Read { offset: 0, .. }));
    }

    #[test]
    fn missing_file_reports_open_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing");
        let err = FileReader::open(&path, 1, 4).err().unwrap();
        assert!(matches!(err, CandidateError::Open { .. }));
        assert_eq!(err.path(), &path);
    }

    #[test]
    fn suspended_reader_resumes_at_its_offset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("world.txt");
        fs::write(&path, b"Hello, World\n").unwrap();

        let mut reader = FileReader::open(&path, 13, 5).unwrap();
        assert_eq!(reader.next_block().unwrap().unwrap(), b"Hello");
        reader.suspend();
        assert!(!reader.is_open());

        assert_eq!(reader.next_block().unwrap().unwrap(), b", Wor");
        assert!(reader.is_open());
        reader.suspend();
        assert_eq!(reader.next_block().unwrap().unwrap(), b"ld\n\0\0");
        assert_eq!(reader.blocks_read(), 3);
    }

    #[test]
    fn suspended_reader_reports_vanished_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gone.txt");
        fs::write(&path, b"abcdefgh").unwrap();

        let mut reader = FileReader::open(&path, 8, 4).unwrap();
        reader.next_block().unwrap();
        reader.suspend();
        fs::remove_file(&path).unwrap();

        let err = reader.next_block().unwrap_err();
        assert!(matches!(err, CandidateError::Open { .. }));
        assert_eq!(reader.bytes_read(), 4);
    }

    #[test]
    fn recognises_descriptor_exhaustion() {
        let emfile = io::Error::from_raw_os_error(24);
        let enoent = io::Error::from_raw_os_error(2);
        assert_eq!(is_descriptor_exhaustion(&emfile), cfg!(unix));
        assert!(!is_descriptor_exhaustion(&enoent));
    }
}
