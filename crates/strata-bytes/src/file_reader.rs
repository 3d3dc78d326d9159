use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use strata_base::{Dependency, Owned, Position, Result, Status, Support};

use crate::buffered_reader::{BufferedReader, Fill, ReadBackend};
use crate::options::BufferedReaderOptions;
use crate::reader::Reader;

/// Reads a file through a [`BufferedReader`].
pub type FileReader<D = Owned<File>> = BufferedReader<FileSource<D>>;

/// The current offset of `file` if it is a seekable regular file.
pub(crate) fn seekable_position(file: &mut File) -> Option<Position> {
    let pos = file.stream_position().ok()?;
    let regular = file.metadata().map(|m| m.is_file()).unwrap_or(false);
    regular.then_some(pos)
}

/// [`ReadBackend`] over a [`File`], borrowed or owned.
///
/// Regular files support random access and report their size; pipes and
/// other streams read sequentially from wherever they are. Files opened by
/// path can be reopened for [`Reader::new_reader`].
#[derive(Debug)]
pub struct FileSource<D: Dependency<Target = File>> {
    file: D,
    path: Option<PathBuf>,
    seekable: bool,
    file_pos: Option<Position>,
}

impl<D: Dependency<Target = File>> FileSource<D> {
    pub fn new(file: D) -> Self {
        Self {
            file,
            path: None,
            seekable: false,
            file_pos: None,
        }
    }

    /// A source which remembers the path it was opened from.
    pub fn with_path(file: D, path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::new(file)
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn file(&self) -> &File {
        self.file.get()
    }

    fn seek_file(&mut self, pos: Position) -> Result<()> {
        self.file
            .get_mut()
            .seek(SeekFrom::Start(pos))
            .map_err(|e| Status::from(e).annotate("seek failed"))?;
        self.file_pos = Some(pos);
        Ok(())
    }
}

impl<D: Dependency<Target = File>> ReadBackend for FileSource<D> {
    fn fill(&mut self, pos: Position, dest: &mut [u8], _min_length: usize) -> Result<Fill> {
        if self.seekable && self.file_pos != Some(pos) {
            self.seek_file(pos)?;
        }
        loop {
            match self.file.get_mut().read(dest) {
                Ok(0) => return Ok(Fill::End),
                Ok(length) => {
                    if self.seekable {
                        self.file_pos = Some(pos + length as Position);
                    }
                    return Ok(Fill::Data(length));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Status::from(e).annotate("read failed")),
            }
        }
    }

    fn initial_pos(&mut self) -> Result<Position> {
        match seekable_position(self.file.get_mut()) {
            Some(pos) => {
                self.seekable = true;
                self.file_pos = Some(pos);
                Ok(pos)
            }
            None => {
                self.seekable = false;
                Ok(0)
            }
        }
    }

    fn random_access_support(&mut self) -> Support {
        if self.seekable {
            Ok(())
        } else {
            Err(Status::unsupported("file is not seekable"))
        }
    }

    fn new_reader_support(&mut self) -> Support {
        if self.path.is_none() {
            return Err(Status::unsupported(
                "new_reader() requires a file opened by path",
            ));
        }
        self.random_access_support()
    }

    fn seek_behind_buffer(&mut self, new_pos: Position) -> Result<Position> {
        let size = self.size()?;
        let reached = new_pos.min(size);
        self.seek_file(reached)?;
        Ok(reached)
    }

    fn size(&mut self) -> Result<Position> {
        let metadata = self
            .file
            .get()
            .metadata()
            .map_err(|e| Status::from(e).annotate("stat failed"))?;
        Ok(metadata.len())
    }

    fn new_reader(
        &mut self,
        initial_pos: Position,
        options: &BufferedReaderOptions,
    ) -> Result<Box<dyn Reader + Send>> {
        let path = self
            .path
            .as_deref()
            .ok_or_else(|| Status::unsupported("new_reader() requires a file opened by path"))?;
        let mut reader = FileReader::open(path, *options)?;
        reader.seek(initial_pos)?;
        Ok(Box::new(reader))
    }

    fn annotate(&self, status: Status) -> Status {
        match &self.path {
            Some(path) => status.annotate(format!("reading {}", path.display())),
            None => status,
        }
    }
}

impl FileReader {
    /// Opens `path` for reading.
    pub fn open(path: impl AsRef<Path>, options: BufferedReaderOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| Status::from(e).annotate(format!("opening {}", path.display())))?;
        Ok(BufferedReader::new(
            FileSource::with_path(Owned(file), path),
            options,
        ))
    }
}

impl<D: Dependency<Target = File>> BufferedReader<FileSource<D>> {
    /// Reads an already open file from its current offset.
    pub fn from_file(file: D, options: BufferedReaderOptions) -> Self {
        BufferedReader::new(FileSource::new(file), options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use strata_base::ErrorKind;
    use tempfile::{tempdir, NamedTempFile};

    fn temp_file_with(data: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(data).unwrap();
        file.flush().unwrap();
        file
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    #[test]
    fn reads_whole_file_and_reports_size() {
        let data = pattern(200_000);
        let file = temp_file_with(&data);
        let mut reader = FileReader::open(file.path(), BufferedReaderOptions::default()).unwrap();
        assert!(reader.supports_random_access());
        assert_eq!(reader.size().unwrap(), 200_000);

        let mut out = Vec::new();
        assert!(!reader.read_to_vec(300_000, &mut out).unwrap());
        assert_eq!(out, data);
        assert!(reader.ok());
        reader.close().unwrap();
    }

    #[test]
    fn random_access_reads() {
        let data = pattern(100_000);
        let file = temp_file_with(&data);
        let mut reader = FileReader::open(file.path(), BufferedReaderOptions::default()).unwrap();
        for pos in [90_000u64, 10, 50_000, 99_999] {
            assert!(reader.seek(pos).unwrap());
            assert_eq!(reader.read_byte().unwrap(), Some(data[pos as usize]));
        }
        assert!(!reader.seek(100_001).unwrap());
        assert_eq!(reader.pos(), 100_000);
    }

    #[test]
    fn borrowed_file_starts_at_its_offset() {
        let file = temp_file_with(b"skip:payload");
        let mut handle = File::open(file.path()).unwrap();
        handle.seek(SeekFrom::Start(5)).unwrap();
        let mut reader = BufferedReader::from_file(&mut handle, BufferedReaderOptions::default());
        assert_eq!(reader.pos(), 5);
        let mut out = Vec::new();
        reader.read_to_vec(7, &mut out).unwrap();
        assert_eq!(out, b"payload");
        reader.close().unwrap();
    }

    #[test]
    fn new_reader_reopens_by_path() {
        let data = pattern(10_000);
        let file = temp_file_with(&data);
        let mut reader = FileReader::open(file.path(), BufferedReaderOptions::default()).unwrap();
        assert!(reader.supports_new_reader());
        let mut fork = reader.new_reader(9_000).unwrap();
        let mut out = Vec::new();
        fork.read_to_vec(1_000, &mut out).unwrap();
        assert_eq!(out, &data[9_000..]);
        assert_eq!(reader.pos(), 0);
    }

    #[test]
    fn new_reader_needs_a_path() {
        let file = temp_file_with(b"abc");
        let handle = File::open(file.path()).unwrap();
        let mut reader = BufferedReader::from_file(Owned(handle), BufferedReaderOptions::default());
        let err = reader.new_reader(0).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert!(reader.ok());
    }

    #[test]
    fn missing_file_names_the_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.bin");
        let err = FileReader::open(&path, BufferedReaderOptions::default())
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Backend);
        assert!(err.to_string().contains("absent.bin"), "{err}");
    }
}
