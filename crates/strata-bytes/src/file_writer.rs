use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use strata_base::{Dependency, Owned, Position, Result, Status, Support};
use tracing::debug;

use crate::buffered_reader::BufferedReader;
use crate::buffered_writer::{BufferedWriter, WriteBackend};
use crate::file_reader::{seekable_position, FileSource};
use crate::options::{BufferOptions, BufferedReaderOptions, FileWriterOptions};
use crate::reader::Reader;
use crate::writer::FlushType;

/// Writes a file through a [`BufferedWriter`].
pub type FileWriter<D = Owned<File>> = BufferedWriter<FileSink<D>>;

/// [`WriteBackend`] over a [`File`], borrowed or owned.
///
/// Flush tiers map to the OS: [`FlushType::FromObject`] only drains the
/// buffer, [`FlushType::FromProcess`] hands data to the kernel, and
/// [`FlushType::FromMachine`] also syncs it to the device.
#[derive(Debug)]
pub struct FileSink<D: Dependency<Target = File>> {
    file: D,
    path: Option<PathBuf>,
    append: bool,
    seekable: bool,
    file_pos: Option<Position>,
}

impl<D: Dependency<Target = File>> FileSink<D> {
    pub fn new(file: D, append: bool) -> Self {
        Self {
            file,
            path: None,
            append,
            seekable: false,
            file_pos: None,
        }
    }

    pub fn with_path(file: D, path: impl Into<PathBuf>, append: bool) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::new(file, append)
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn file(&self) -> &File {
        self.file.get()
    }

    fn file_len(&self) -> Result<Position> {
        let metadata = self
            .file
            .get()
            .metadata()
            .map_err(|e| Status::from(e).annotate("stat failed"))?;
        Ok(metadata.len())
    }
}

impl<D: Dependency<Target = File>> WriteBackend for FileSink<D> {
    fn write(&mut self, pos: Position, src: &[u8]) -> Result<()> {
        let file = self.file.get_mut();
        if self.seekable && self.file_pos != Some(pos) {
            file.seek(SeekFrom::Start(pos))
                .map_err(|e| Status::from(e).annotate("seek failed"))?;
        }
        // write_all retries interrupted writes.
        file.write_all(src)
            .map_err(|e| Status::from(e).annotate("write failed"))?;
        if self.seekable {
            self.file_pos = Some(pos + src.len() as Position);
        }
        Ok(())
    }

    fn initial_pos(&mut self) -> Result<Position> {
        if self.append {
            return match self.file_len() {
                Ok(len) => Ok(len),
                // Appending to a pipe.
                Err(_) => Ok(0),
            };
        }
        match seekable_position(self.file.get_mut()) {
            Some(pos) => {
                self.seekable = true;
                self.file_pos = Some(pos);
                Ok(pos)
            }
            None => Ok(0),
        }
    }

    fn flush(&mut self, flush_type: FlushType) -> Result<()> {
        let file = self.file.get_mut();
        match flush_type {
            FlushType::FromObject => Ok(()),
            FlushType::FromProcess => file
                .flush()
                .map_err(|e| Status::from(e).annotate("flush failed")),
            FlushType::FromMachine => {
                file.flush()
                    .map_err(|e| Status::from(e).annotate("flush failed"))?;
                file.sync_data()
                    .map_err(|e| Status::from(e).annotate("fdatasync failed"))?;
                debug!(path = ?self.path, "synced file data");
                Ok(())
            }
        }
    }

    fn random_access_support(&mut self) -> Support {
        if self.append {
            Err(Status::unsupported("append mode excludes random access"))
        } else if !self.seekable {
            Err(Status::unsupported("file is not seekable"))
        } else {
            Ok(())
        }
    }

    fn truncate_support(&mut self) -> Support {
        self.random_access_support()
    }

    fn read_mode_support(&mut self) -> Support {
        self.random_access_support()
    }

    fn seek_behind_buffer(&mut self, new_pos: Position) -> Result<Position> {
        let size = self.file_len()?;
        // The next write seeks.
        self.file_pos = None;
        Ok(new_pos.min(size))
    }

    fn size(&mut self) -> Result<Position> {
        self.file_len()
    }

    fn truncate(&mut self, new_size: Position) -> Result<Position> {
        let size = self.file_len()?;
        self.file_pos = None;
        if new_size > size {
            return Ok(size);
        }
        self.file
            .get()
            .set_len(new_size)
            .map_err(|e| Status::from(e).annotate("ftruncate failed"))?;
        Ok(new_size)
    }

    fn read_mode(
        &mut self,
        initial_pos: Position,
        options: &BufferOptions,
    ) -> Result<Box<dyn Reader + '_>> {
        let clone = self
            .file
            .get()
            .try_clone()
            .map_err(|e| Status::from(e).annotate("dup failed"))?;
        // The clone shares the OS offset; the next write seeks.
        self.file_pos = None;
        let source = match &self.path {
            Some(path) => FileSource::with_path(Owned(clone), path.clone()),
            None => FileSource::new(Owned(clone)),
        };
        let options = BufferedReaderOptions {
            buffer: *options,
            ..Default::default()
        };
        let mut reader = BufferedReader::new(source, options);
        reader.seek(initial_pos)?;
        Ok(Box::new(reader))
    }

    fn annotate(&self, status: Status) -> Status {
        match &self.path {
            Some(path) => status.annotate(format!("writing {}", path.display())),
            None => status,
        }
    }
}

impl FileWriter {
    /// Creates or truncates `path`, or appends to it if `options.append`.
    pub fn create(path: impl AsRef<Path>, options: FileWriterOptions) -> Result<Self> {
        let path = path.as_ref();
        let mut open_options = OpenOptions::new();
        open_options.read(true).create(true);
        if options.append {
            open_options.append(true);
        } else {
            open_options.write(true).truncate(true);
        }
        let file = open_options
            .open(path)
            .map_err(|e| Status::from(e).annotate(format!("opening {}", path.display())))?;
        Ok(BufferedWriter::new(
            FileSink::with_path(Owned(file), path, options.append),
            options.buffer,
        ))
    }
}

impl<D: Dependency<Target = File>> BufferedWriter<FileSink<D>> {
    /// Writes an already open file from its current offset.
    pub fn from_file(file: D, options: FileWriterOptions) -> Self {
        BufferedWriter::new(FileSink::new(file, options.append), options.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::Writer;
    use strata_base::ErrorKind;
    use tempfile::tempdir;

    #[test]
    fn writes_and_reads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let data: Vec<u8> = (0..150_000u32).map(|i| (i % 253) as u8).collect();

        let mut writer = FileWriter::create(&path, FileWriterOptions::default()).unwrap();
        for chunk in data.chunks(1000) {
            writer.write(chunk).unwrap();
        }
        writer.flush(FlushType::FromMachine).unwrap();
        assert_eq!(writer.size().unwrap(), 150_000);
        writer.close().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), data);
    }

    #[test]
    fn seek_and_truncate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("edit.bin");
        let mut writer = FileWriter::create(&path, FileWriterOptions::default()).unwrap();
        writer.write(b"0123456789").unwrap();
        assert!(writer.seek(3).unwrap());
        writer.write(b"abc").unwrap();
        assert!(!writer.seek(20).unwrap());
        assert_eq!(writer.pos(), 10);
        assert!(writer.truncate(8).unwrap());
        writer.write(b"XY").unwrap();
        writer.close().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"012abc67XY");
    }

    #[test]
    fn read_mode_reads_what_was_written() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rw.bin");
        let mut writer = FileWriter::create(&path, FileWriterOptions::default()).unwrap();
        writer.write(b"first second").unwrap();
        {
            let mut reader = writer.read_mode(6).unwrap();
            let mut word = Vec::new();
            reader.read_to_vec(6, &mut word).unwrap();
            assert_eq!(word, b"second");
        }
        writer.write(b" third").unwrap();
        writer.close().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"first second third");
    }

    #[test]
    fn append_mode_has_no_random_access() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.txt");
        std::fs::write(&path, b"old;").unwrap();
        let options = FileWriterOptions {
            append: true,
            ..Default::default()
        };
        let mut writer = FileWriter::create(&path, options).unwrap();
        assert_eq!(writer.pos(), 4);
        assert!(!writer.supports_random_access());
        let err = writer.seek(0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert!(err.to_string().contains("log.txt"), "{err}");
        writer.write(b"new;").unwrap();
        writer.close().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"old;new;");
    }

    #[test]
    fn borrowed_file_stays_usable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("borrowed.bin");
        let mut file = File::create(&path).unwrap();
        {
            let mut writer = BufferedWriter::from_file(&mut file, FileWriterOptions::default());
            writer.write(b"through the writer").unwrap();
            writer.close().unwrap();
        }
        file.write_all(b"; directly").unwrap();
        drop(file);
        assert_eq!(
            std::fs::read(&path).unwrap(),
            b"through the writer; directly"
        );
    }
}
