use strata_base::{CapabilityCell, Position, Result, Status, Support};
use tracing::warn;

use crate::options::{BufferOptions, BufferSizer};
use crate::reader::Reader;
use crate::writer::{close_on_drop, FlushType, Writer, WriterBase};

/// A destination which accepts whole slices at given positions, driven by
/// [`BufferedWriter`].
pub trait WriteBackend {
    /// Writes all of `src` at `pos`. Positions of consecutive calls are
    /// contiguous unless [`WriteBackend::seek_behind_buffer`] or
    /// [`WriteBackend::truncate`] was called in between.
    fn write(&mut self, pos: Position, src: &[u8]) -> Result<()>;

    /// The position of the first byte [`WriteBackend::write`] will receive.
    fn initial_pos(&mut self) -> Result<Position> {
        Ok(0)
    }

    fn flush(&mut self, _flush_type: FlushType) -> Result<()> {
        Ok(())
    }

    fn random_access_support(&mut self) -> Support {
        Err(Status::unsupported("destination does not support random access"))
    }

    fn size_support(&mut self) -> Support {
        self.random_access_support()
    }

    fn truncate_support(&mut self) -> Support {
        Err(Status::unsupported("destination does not support truncate()"))
    }

    fn read_mode_support(&mut self) -> Support {
        Err(Status::unsupported("destination does not support read_mode()"))
    }

    /// Repositions the destination to `new_pos`, or to its end if it is
    /// shorter. Returns the position reached.
    fn seek_behind_buffer(&mut self, _new_pos: Position) -> Result<Position> {
        Err(Status::unsupported("destination does not support seeking"))
    }

    fn size(&mut self) -> Result<Position> {
        Err(Status::unsupported("destination does not support size()"))
    }

    /// Cuts the destination to `new_size` unless it is shorter. Returns the
    /// resulting size, where writing continues.
    fn truncate(&mut self, _new_size: Position) -> Result<Position> {
        Err(Status::unsupported("destination does not support truncate()"))
    }

    fn read_mode(
        &mut self,
        _initial_pos: Position,
        _options: &BufferOptions,
    ) -> Result<Box<dyn Reader + '_>> {
        Err(Status::unsupported("destination does not support read_mode()"))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn annotate(&self, status: Status) -> Status {
        status
    }

    /// Adds the current position to a failure.
    fn annotate_at(&self, status: Status, pos: Position) -> Status {
        status.annotate(format!("at byte {pos}"))
    }
}

/// A [`Writer`] which collects small writes in an owned buffer and hands
/// them to a [`WriteBackend`] in large slices.
///
/// Writes at least as large as the next buffer would be bypass it.
pub struct BufferedWriter<B: WriteBackend> {
    base: WriterBase,
    backend: B,
    buffer: Vec<u8>,
    options: BufferOptions,
    sizer: BufferSizer,
    random_access: CapabilityCell,
    size: CapabilityCell,
    truncate: CapabilityCell,
    read_mode: CapabilityCell,
}

impl<B: WriteBackend> BufferedWriter<B> {
    pub fn new(backend: B, options: BufferOptions) -> Self {
        let mut writer = Self {
            base: WriterBase::closed(),
            backend,
            buffer: Vec::new(),
            options,
            sizer: BufferSizer::new(options),
            random_access: CapabilityCell::new(),
            size: CapabilityCell::new(),
            truncate: CapabilityCell::new(),
            read_mode: CapabilityCell::new(),
        };
        writer.initialize();
        writer
    }

    /// Rebinds to a new backend. Data buffered for the previous backend is
    /// dropped; close first to keep it.
    pub fn reset(&mut self, backend: B, options: BufferOptions) {
        self.backend = backend;
        self.options = options;
        self.sizer = BufferSizer::new(options);
        self.random_access.reset();
        self.size.reset();
        self.truncate.reset();
        self.read_mode.reset();
        self.initialize();
    }

    fn initialize(&mut self) {
        self.base.reset(true);
        if let Err(status) = self.options.validate() {
            self.fail(status);
            return;
        }
        match self.backend.initial_pos() {
            Ok(pos) => {
                self.base.set_start_pos(pos);
                self.sizer.begin_run(pos);
            }
            Err(status) => {
                self.fail(status);
            }
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Hands buffered data to the backend and empties the window.
    fn drain(&mut self) -> Result<()> {
        let start = self.base.start();
        let length = self.base.start_to_cursor();
        if length > 0 {
            let pos = self.base.start_pos();
            if let Err(status) = self.backend.write(pos, &self.buffer[start..start + length]) {
                return Err(self.fail(status));
            }
        }
        self.base.discard_buffer();
        Ok(())
    }
}

impl<B: WriteBackend> Writer for BufferedWriter<B> {
    fn base(&self) -> &WriterBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WriterBase {
        &mut self.base
    }

    fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    fn push_slow(&mut self, min_length: usize, recommended_length: usize) -> Result<()> {
        self.base.object().check()?;
        self.drain()?;
        let pos = self.base.pos();
        let length = self.sizer.buffer_length(pos, min_length, recommended_length);
        if self.buffer.len() < length {
            self.buffer.resize(length, 0);
        }
        let room = usize::try_from(Position::MAX - pos)
            .unwrap_or(usize::MAX)
            .min(self.buffer.len());
        if room < min_length {
            return Err(self.fail_overflow());
        }
        self.base.set_buffer(0, room, 0);
        Ok(())
    }

    fn write_slow(&mut self, src: &[u8]) -> Result<()> {
        self.base.object().check()?;
        if src.len() as Position > Position::MAX - self.base.pos() {
            return Err(self.fail_overflow());
        }
        if src.len() >= self.sizer.buffer_length(self.base.pos(), 1, 0) {
            self.drain()?;
            let pos = self.base.start_pos();
            if let Err(status) = self.backend.write(pos, src) {
                return Err(self.fail(status));
            }
            self.base.set_start_pos(pos + src.len() as Position);
            return Ok(());
        }
        let mut written = 0;
        while written < src.len() {
            self.push(1, src.len() - written)?;
            let length = self.base.available().min(src.len() - written);
            let cursor = self.base.cursor();
            self.buffer[cursor..cursor + length].copy_from_slice(&src[written..written + length]);
            self.base.move_cursor(length);
            written += length;
        }
        Ok(())
    }

    fn flush_impl(&mut self, flush_type: FlushType) -> Result<()> {
        self.base.object().check()?;
        self.drain()?;
        if let Err(status) = self.backend.flush(flush_type) {
            return Err(self.fail(status));
        }
        Ok(())
    }

    fn seek_slow(&mut self, new_pos: Position) -> Result<bool> {
        self.drain()?;
        let reached = match self.backend.seek_behind_buffer(new_pos) {
            Ok(reached) => reached,
            Err(status) => return Err(self.fail(status)),
        };
        self.base.set_start_pos(reached);
        self.sizer.begin_run(reached);
        Ok(reached == new_pos)
    }

    fn size_impl(&mut self) -> Result<Position> {
        self.drain()?;
        match self.backend.size() {
            Ok(size) => Ok(size),
            Err(status) => Err(self.fail(status)),
        }
    }

    fn truncate_impl(&mut self, new_size: Position) -> Result<bool> {
        self.drain()?;
        let size = match self.backend.truncate(new_size) {
            Ok(size) => size,
            Err(status) => return Err(self.fail(status)),
        };
        self.base.set_start_pos(size);
        self.sizer.begin_run(size);
        Ok(size == new_size)
    }

    fn read_mode_impl(&mut self, initial_pos: Position) -> Result<Box<dyn Reader + '_>> {
        self.drain()?;
        if let Err(status) = self.backend.flush(FlushType::FromObject) {
            return Err(self.fail(status));
        }
        self.backend.read_mode(initial_pos, &self.options)
    }

    fn random_access_support(&mut self) -> Support {
        let backend = &mut self.backend;
        self.random_access
            .get_or_compute(|| backend.random_access_support())
    }

    fn size_support(&mut self) -> Support {
        let backend = &mut self.backend;
        self.size.get_or_compute(|| backend.size_support())
    }

    fn truncate_support(&mut self) -> Support {
        let backend = &mut self.backend;
        self.truncate.get_or_compute(|| backend.truncate_support())
    }

    fn read_mode_support(&mut self) -> Support {
        let backend = &mut self.backend;
        self.read_mode.get_or_compute(|| backend.read_mode_support())
    }

    fn done(&mut self) {
        if self.base.object().ok() {
            // drain records its failure; close() returns it from there.
            if let Err(status) = self.drain() {
                warn!(%status, "buffered data lost while closing");
            }
        }
        if let Err(status) = self.backend.close() {
            self.fail(status);
        }
        self.buffer = Vec::new();
    }

    fn annotate(&self, status: Status) -> Status {
        let status = self.backend.annotate(status);
        if self.base.object().is_open() {
            self.backend.annotate_at(status, self.base.pos())
        } else {
            status
        }
    }
}

impl<B: WriteBackend> Drop for BufferedWriter<B> {
    fn drop(&mut self) {
        close_on_drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_base::ErrorKind;

    /// Backend which stores data in a vector and records each write.
    #[derive(Default)]
    struct RecordingSink {
        data: Vec<u8>,
        writes: Vec<(Position, usize)>,
        flushes: Vec<FlushType>,
        initial_pos: Position,
        fail_writes: bool,
        fail_close: bool,
    }

    impl WriteBackend for RecordingSink {
        fn write(&mut self, pos: Position, src: &[u8]) -> Result<()> {
            if self.fail_writes {
                return Err(Status::backend("device full"));
            }
            self.writes.push((pos, src.len()));
            let pos = (pos - self.initial_pos) as usize;
            if self.data.len() < pos + src.len() {
                self.data.resize(pos + src.len(), 0);
            }
            self.data[pos..pos + src.len()].copy_from_slice(src);
            Ok(())
        }

        fn initial_pos(&mut self) -> Result<Position> {
            Ok(self.initial_pos)
        }

        fn flush(&mut self, flush_type: FlushType) -> Result<()> {
            self.flushes.push(flush_type);
            Ok(())
        }

        fn random_access_support(&mut self) -> Support {
            Ok(())
        }

        fn seek_behind_buffer(&mut self, new_pos: Position) -> Result<Position> {
            Ok(new_pos.min(self.initial_pos + self.data.len() as Position))
        }

        fn size(&mut self) -> Result<Position> {
            Ok(self.data.len() as Position)
        }

        fn close(&mut self) -> Result<()> {
            if self.fail_close {
                return Err(Status::backend("close failed"));
            }
            Ok(())
        }
    }

    #[test]
    fn reset_rebinds_after_close() {
        let mut writer = BufferedWriter::new(RecordingSink::default(), BufferOptions::default());
        writer.write(b"first").unwrap();
        writer.close().unwrap();
        assert_eq!(writer.backend().data, b"first");

        let sink = RecordingSink {
            initial_pos: 7,
            ..Default::default()
        };
        writer.reset(sink, BufferOptions::default());
        assert!(writer.ok());
        assert_eq!(writer.pos(), 7);
        writer.write(b"second").unwrap();
        writer.close().unwrap();
        assert_eq!(writer.backend().data, b"second");
        assert_eq!(writer.backend().writes, vec![(7, 6)]);
    }

    #[test]
    fn small_writes_are_coalesced() {
        let mut writer = BufferedWriter::new(RecordingSink::default(), BufferOptions::default());
        for i in 0..100u8 {
            writer.write(&[i; 10]).unwrap();
        }
        assert!(writer.backend().writes.is_empty());
        writer.flush(FlushType::FromProcess).unwrap();
        assert_eq!(writer.backend().writes, vec![(0, 1000)]);
        assert_eq!(writer.backend().flushes, vec![FlushType::FromProcess]);
        assert_eq!(writer.pos(), 1000);
    }

    #[test]
    fn large_write_bypasses_buffer() {
        let mut writer = BufferedWriter::new(RecordingSink::default(), BufferOptions::default());
        writer.write(b"head").unwrap();
        writer.write(&vec![1u8; 100_000]).unwrap();
        assert_eq!(writer.backend().writes, vec![(0, 4), (4, 100_000)]);
        writer.close().unwrap();
        assert_eq!(writer.pos(), 100_004);
    }

    #[test]
    fn seek_drains_then_overwrites() {
        let mut writer = BufferedWriter::new(RecordingSink::default(), BufferOptions::default());
        writer.write(b"hello world").unwrap();
        assert!(writer.seek(6).unwrap());
        writer.write(b"there").unwrap();
        assert_eq!(writer.size().unwrap(), 11);
        assert!(!writer.seek(50).unwrap());
        assert_eq!(writer.pos(), 11);
        writer.close().unwrap();
        assert_eq!(writer.backend().data, b"hello there");
    }

    #[test]
    fn position_overflow_is_reported() {
        let sink = RecordingSink {
            initial_pos: Position::MAX - 2,
            ..Default::default()
        };
        let mut writer = BufferedWriter::new(sink, BufferOptions::default());
        writer.write(b"ab").unwrap();
        let err = writer.write(b"cd").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Overflow);
        assert!(!writer.ok());
    }

    #[test]
    fn push_at_max_position_overflows() {
        let sink = RecordingSink {
            initial_pos: Position::MAX,
            ..Default::default()
        };
        let mut writer = BufferedWriter::new(sink, BufferOptions::default());
        assert_eq!(writer.push(1, 0).unwrap_err().kind(), ErrorKind::Overflow);
    }

    #[test]
    fn backend_failure_surfaces_on_close() {
        let sink = RecordingSink {
            fail_writes: true,
            ..Default::default()
        };
        let mut writer = BufferedWriter::new(sink, BufferOptions::default());
        writer.write(b"buffered").unwrap();
        let err = writer.close().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Backend);
        assert!(err.to_string().contains("device full"));
        assert_eq!(writer.write(b"x").unwrap_err(), err);
    }

    #[test]
    fn failed_writer_rejects_further_writes() {
        let mut writer = BufferedWriter::new(RecordingSink::default(), BufferOptions::default());
        writer.write(b"abc").unwrap();
        writer.flush(FlushType::FromObject).unwrap();

        writer.backend_mut().fail_writes = true;
        writer.write(b"def").unwrap();
        let err = writer.flush(FlushType::FromObject).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Backend);
        assert!(err.to_string().contains("at byte 6"), "{err}");
        assert!(!writer.ok());
        assert_eq!(writer.available(), 0);
        assert_eq!(writer.pos(), 6);

        writer.backend_mut().fail_writes = false;
        assert_eq!(writer.write(b"x").unwrap_err(), err);
        assert_eq!(writer.write_byte(b'x').unwrap_err(), err);
        assert_eq!(writer.push(1, 0).unwrap_err(), err);
        assert_eq!(writer.flush(FlushType::FromProcess).unwrap_err(), err);
        assert_eq!(writer.close().unwrap_err(), err);
        assert_eq!(writer.backend().data, b"abc");
    }

    #[test]
    fn backend_close_failure_is_returned_by_close() {
        let sink = RecordingSink {
            fail_close: true,
            ..Default::default()
        };
        let mut writer = BufferedWriter::new(sink, BufferOptions::default());
        writer.write(b"payload").unwrap();
        let err = writer.close().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Backend);
        assert!(err.to_string().contains("close failed"), "{err}");
        assert_eq!(writer.backend().data, b"payload");
        assert_eq!(writer.close().unwrap_err(), err);
    }

    #[test]
    fn unsupported_truncate_is_not_fatal() {
        let mut writer = BufferedWriter::new(RecordingSink::default(), BufferOptions::default());
        assert!(!writer.supports_truncate());
        assert_eq!(writer.truncate(0).unwrap_err().kind(), ErrorKind::Unsupported);
        assert!(writer.ok());
        writer.close().unwrap();
    }
}
