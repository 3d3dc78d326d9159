use bytes::Bytes;
use strata_base::{Dependency, Position, Result, Status, Support};

use crate::reader::{Reader, ReaderBase};
use crate::writer::{close_on_drop, FlushType, Writer, WriterBase};

/// Memory which a [`MemoryReader`] exposes as its window.
pub trait MemorySource: AsRef<[u8]> {
    fn fork_support(&self) -> Support {
        Err(Status::unsupported(
            "borrowed memory cannot be shared with a new reader; use a BytesReader",
        ))
    }

    /// A reader over the same memory, independent of the original.
    fn fork_reader(&self, _initial_pos: Position) -> Result<Box<dyn Reader + Send>> {
        Err(Status::unsupported(
            "borrowed memory cannot be shared with a new reader; use a BytesReader",
        ))
    }
}

impl<'a> MemorySource for &'a [u8] {}

impl MemorySource for Vec<u8> {}

impl MemorySource for Bytes {
    fn fork_support(&self) -> Support {
        Ok(())
    }

    fn fork_reader(&self, initial_pos: Position) -> Result<Box<dyn Reader + Send>> {
        let mut reader = MemoryReader::new(self.clone());
        reader.seek(initial_pos)?;
        Ok(Box::new(reader))
    }
}

/// A [`Reader`] whose window is the whole source, so reads never copy into
/// an intermediate buffer and every seek is O(1).
#[derive(Debug)]
pub struct MemoryReader<S: MemorySource> {
    base: ReaderBase,
    source: S,
}

/// Reads a borrowed slice.
pub type SliceReader<'a> = MemoryReader<&'a [u8]>;

/// Reads shared, reference-counted memory; supports
/// [`Reader::new_reader`].
pub type BytesReader = MemoryReader<Bytes>;

impl<S: MemorySource> MemoryReader<S> {
    pub fn new(source: S) -> Self {
        let mut base = ReaderBase::new();
        let len = source.as_ref().len();
        base.set_buffer(0, len, 0);
        base.set_limit_pos(len as Position);
        Self { base, source }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn len(&self) -> Position {
        self.source.as_ref().len() as Position
    }
}

impl<S: MemorySource> Reader for MemoryReader<S> {
    fn base(&self) -> &ReaderBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ReaderBase {
        &mut self.base
    }

    fn buffer(&self) -> &[u8] {
        self.source.as_ref()
    }

    fn pull_slow(&mut self, _min_length: usize, _recommended_length: usize) -> Result<bool> {
        self.base.object().check()?;
        Ok(false)
    }

    fn seek_slow(&mut self, _new_pos: Position) -> Result<bool> {
        // Everything is in the window; only seeks past the end land here.
        self.base.object().check()?;
        let limit = self.base.limit();
        self.base.set_cursor(limit);
        Ok(false)
    }

    fn size_impl(&mut self) -> Result<Position> {
        Ok(self.len())
    }

    fn new_reader_impl(&mut self, initial_pos: Position) -> Result<Box<dyn Reader + Send>> {
        self.source.fork_reader(initial_pos)
    }

    fn random_access_support(&mut self) -> Support {
        Ok(())
    }

    fn new_reader_support(&mut self) -> Support {
        self.source.fork_support()
    }
}

/// A [`Writer`] which appends to a `Vec<u8>`, borrowed or owned.
///
/// Writes go straight into the vector's spare capacity. The vector holds
/// exactly the written data after [`Writer::flush`] or [`Writer::close`].
pub struct VecWriter<D: Dependency<Target = Vec<u8>>> {
    base: WriterBase,
    dest: D,
    size: usize,
}

impl<D: Dependency<Target = Vec<u8>>> VecWriter<D> {
    /// Writes `dest` from the beginning, replacing its contents.
    pub fn new(mut dest: D) -> Self {
        dest.get_mut().clear();
        Self::at(dest, 0)
    }

    /// Writes after the existing contents of `dest`.
    pub fn append(dest: D) -> Self {
        let size = dest.get().len();
        Self::at(dest, size)
    }

    fn at(dest: D, size: usize) -> Self {
        let mut base = WriterBase::new();
        base.set_buffer(0, size, size);
        Self { base, dest, size }
    }

    pub fn dest(&self) -> &D {
        &self.dest
    }

    /// The data written so far.
    pub fn written(&mut self) -> &[u8] {
        self.sync_size();
        &self.dest.get()[..self.size]
    }

    fn sync_size(&mut self) {
        // Offsets equal positions; a failed writer keeps only the position.
        self.size = self.size.max(self.base.pos() as usize);
    }

    /// Drops spare capacity from the vector so it holds exactly the data.
    fn trim(&mut self) {
        self.sync_size();
        self.dest.get_mut().truncate(self.size);
        if self.base.object().ok() {
            let cursor = self.base.cursor();
            self.base.set_buffer(0, self.size, cursor);
        }
    }
}

impl<D: Dependency<Target = Vec<u8>>> Writer for VecWriter<D> {
    fn base(&self) -> &WriterBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WriterBase {
        &mut self.base
    }

    fn buffer_mut(&mut self) -> &mut [u8] {
        self.dest.get_mut().as_mut_slice()
    }

    fn push_slow(&mut self, min_length: usize, _recommended_length: usize) -> Result<()> {
        self.base.object().check()?;
        self.sync_size();
        let cursor = self.base.cursor();
        let Some(needed) = cursor.checked_add(min_length) else {
            return Err(self.fail_overflow());
        };
        let vec = self.dest.get_mut();
        if vec.len() < needed {
            if let Err(err) = vec.try_reserve(needed - vec.len()) {
                return Err(self.fail(Status::backend(format!("Vec::try_reserve() failed: {err}"))));
            }
            // Expose the whole allocation; Vec sizes it geometrically.
            let capacity = vec.capacity();
            vec.resize(capacity, 0);
        }
        let len = vec.len();
        self.base.set_buffer(0, len, cursor);
        Ok(())
    }

    fn flush_impl(&mut self, _flush_type: FlushType) -> Result<()> {
        self.base.object().check()?;
        self.trim();
        Ok(())
    }

    fn seek_slow(&mut self, new_pos: Position) -> Result<bool> {
        self.base.object().check()?;
        self.sync_size();
        match usize::try_from(new_pos) {
            Ok(new_pos) if new_pos <= self.size => {
                self.base.set_cursor(new_pos);
                Ok(true)
            }
            _ => {
                self.base.set_cursor(self.size);
                Ok(false)
            }
        }
    }

    fn size_impl(&mut self) -> Result<Position> {
        self.sync_size();
        Ok(self.size as Position)
    }

    fn truncate_impl(&mut self, new_size: Position) -> Result<bool> {
        self.sync_size();
        match usize::try_from(new_size) {
            Ok(new_size) if new_size <= self.size => {
                self.size = new_size;
                self.base.set_cursor(new_size);
                Ok(true)
            }
            _ => {
                self.base.set_cursor(self.size);
                Ok(false)
            }
        }
    }

    fn read_mode_impl(&mut self, initial_pos: Position) -> Result<Box<dyn Reader + '_>> {
        self.trim();
        let mut reader = SliceReader::new(self.dest.get().as_slice());
        reader.seek(initial_pos)?;
        Ok(Box::new(reader))
    }

    fn random_access_support(&mut self) -> Support {
        Ok(())
    }

    fn truncate_support(&mut self) -> Support {
        Ok(())
    }

    fn read_mode_support(&mut self) -> Support {
        Ok(())
    }

    fn done(&mut self) {
        self.trim();
    }
}

impl<D: Dependency<Target = Vec<u8>>> Drop for VecWriter<D> {
    fn drop(&mut self) {
        close_on_drop(self);
    }
}
