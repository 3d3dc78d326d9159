//! Decorators which add a constant to every position of the wrapped stream.
//!
//! Useful when a stream is embedded at a known offset of a larger one: a
//! record format written into the middle of a container reports container
//! positions. Data passes through untouched and the wrapped stream's buffer
//! is shared, not copied.

use strata_base::{Dependency, Position, Result, Status, Support};

use crate::options::PositionShiftingOptions;
use crate::reader::{close_on_drop as close_reader_on_drop, Reader, ReaderBase};
use crate::writer::{close_on_drop as close_writer_on_drop, FlushType, Writer, WriterBase};

fn underflow(pos: Position, base_pos: Position) -> Status {
    Status::underflow(format!(
        "position {pos} is before the base position {base_pos}"
    ))
}

/// A [`Reader`] reporting the positions of `src` plus `base_pos`.
pub struct PositionShiftingReader<D>
where
    D: Dependency,
    D::Target: Reader,
{
    base: ReaderBase,
    src: D,
    base_pos: Position,
}

impl<D> PositionShiftingReader<D>
where
    D: Dependency,
    D::Target: Reader,
{
    pub fn new(src: D, options: PositionShiftingOptions) -> Self {
        let mut reader = Self {
            base: ReaderBase::new(),
            src,
            base_pos: options.base_pos,
        };
        reader.make_buffer();
        reader
    }

    pub fn base_pos(&self) -> Position {
        self.base_pos
    }

    pub fn src(&self) -> &D {
        &self.src
    }

    fn sync_buffer(&mut self) {
        // A failed reader has given up its window.
        if !self.base.object().ok() {
            return;
        }
        let cursor = self.base.cursor();
        self.src.get_mut().set_cursor(cursor);
    }

    /// Adopts the window of `src` and propagates its failure.
    fn make_buffer(&mut self) {
        let src = self.src.get();
        let src_base = src.base();
        let (start, cursor, limit) = (src_base.start(), src_base.cursor(), src_base.limit());
        let src_limit_pos = src_base.limit_pos();
        let failure = src.status().cloned();

        if src_limit_pos > Position::MAX - self.base_pos {
            self.base.set_buffer(cursor, 0, 0);
            self.base.set_limit_pos(Position::MAX);
            self.fail_overflow();
            return;
        }
        self.base.set_buffer(start, limit - start, cursor - start);
        self.base.set_limit_pos(src_limit_pos + self.base_pos);
        if let Some(status) = failure {
            let status = self.annotate_over_src(status);
            self.fail_without_annotation(status);
        }
    }

    fn annotate_over_src(&self, status: Status) -> Status {
        status.annotate(format!("at shifted byte {}", self.base.pos()))
    }

    /// Prefers the failure recorded by `make_buffer` over the raw status
    /// returned by `src`.
    fn forward<T>(&self, result: Result<T>) -> Result<T> {
        result.map_err(|status| self.base.object().status().cloned().unwrap_or(status))
    }
}

impl<D> Reader for PositionShiftingReader<D>
where
    D: Dependency,
    D::Target: Reader,
{
    fn base(&self) -> &ReaderBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ReaderBase {
        &mut self.base
    }

    fn buffer(&self) -> &[u8] {
        self.src.get().buffer()
    }

    fn pull_slow(&mut self, min_length: usize, recommended_length: usize) -> Result<bool> {
        self.base.object().check()?;
        self.sync_buffer();
        let result = self.src.get_mut().pull(min_length, recommended_length);
        self.make_buffer();
        self.forward(result)
    }

    fn read_slow(&mut self, dest: &mut [u8]) -> Result<bool> {
        self.base.object().check()?;
        self.sync_buffer();
        let result = self.src.get_mut().read(dest);
        self.make_buffer();
        self.forward(result)
    }

    fn seek_slow(&mut self, new_pos: Position) -> Result<bool> {
        self.base.object().check()?;
        if new_pos < self.base_pos {
            return Err(self.fail(underflow(new_pos, self.base_pos)));
        }
        self.sync_buffer();
        let result = self.src.get_mut().seek(new_pos - self.base_pos);
        self.make_buffer();
        self.forward(result)
    }

    fn size_impl(&mut self) -> Result<Position> {
        self.sync_buffer();
        let result = self.src.get_mut().size();
        self.make_buffer();
        let size = self.forward(result)?;
        match size.checked_add(self.base_pos) {
            Some(size) => Ok(size),
            None => Err(self.fail_overflow()),
        }
    }

    fn new_reader_impl(&mut self, initial_pos: Position) -> Result<Box<dyn Reader + Send>> {
        if initial_pos < self.base_pos {
            return Err(self.fail(underflow(initial_pos, self.base_pos)));
        }
        self.sync_buffer();
        let result = self.src.get_mut().new_reader(initial_pos - self.base_pos);
        self.make_buffer();
        let src = self.forward(result)?;
        let options = PositionShiftingOptions {
            base_pos: self.base_pos,
        };
        Ok(Box::new(PositionShiftingReader::new(src, options)))
    }

    fn random_access_support(&mut self) -> Support {
        self.src.get_mut().random_access_support()
    }

    fn rewind_support(&mut self) -> Support {
        self.src.get_mut().rewind_support()
    }

    fn size_support(&mut self) -> Support {
        self.src.get_mut().size_support()
    }

    fn new_reader_support(&mut self) -> Support {
        self.src.get_mut().new_reader_support()
    }

    fn done(&mut self) {
        self.sync_buffer();
        if self.src.is_owning() {
            if let Err(status) = self.src.get_mut().close() {
                let status = self.annotate_over_src(status);
                self.fail_without_annotation(status);
            }
        }
    }
}

impl<D> Drop for PositionShiftingReader<D>
where
    D: Dependency,
    D::Target: Reader,
{
    fn drop(&mut self) {
        close_reader_on_drop(self);
    }
}

/// A [`Writer`] reporting the positions of `dest` plus `base_pos`.
///
/// Seeking, truncating, or entering read mode before `base_pos` fails with
/// `Underflow`.
pub struct PositionShiftingWriter<D>
where
    D: Dependency,
    D::Target: Writer,
{
    base: WriterBase,
    dest: D,
    base_pos: Position,
}

impl<D> PositionShiftingWriter<D>
where
    D: Dependency,
    D::Target: Writer,
{
    pub fn new(dest: D, options: PositionShiftingOptions) -> Self {
        let mut writer = Self {
            base: WriterBase::new(),
            dest,
            base_pos: options.base_pos,
        };
        writer.make_buffer();
        writer
    }

    pub fn base_pos(&self) -> Position {
        self.base_pos
    }

    pub fn dest(&self) -> &D {
        &self.dest
    }

    /// Runs `f` on the wrapped writer with this writer's data handed over
    /// first and its window refreshed afterwards.
    pub fn with_dest<R>(&mut self, f: impl FnOnce(&mut D::Target) -> R) -> R {
        self.sync_buffer();
        let result = f(self.dest.get_mut());
        if self.base.object().ok() {
            self.make_buffer();
        }
        result
    }

    fn sync_buffer(&mut self) {
        // An empty window may be stale after read mode or a failure; there
        // is nothing to hand over then.
        if self.base.start_to_cursor() > 0 {
            let cursor = self.base.cursor();
            self.dest.get_mut().set_cursor(cursor);
        }
    }

    /// Adopts the free space of `dest` and propagates its failure.
    fn make_buffer(&mut self) {
        let dest = self.dest.get();
        let dest_base = dest.base();
        let (cursor, limit) = (dest_base.cursor(), dest_base.limit());
        let dest_pos = dest_base.pos();
        let failure = dest.status().cloned();

        if dest_pos > Position::MAX - self.base_pos {
            self.base.set_buffer(cursor, 0, 0);
            self.base.set_start_pos(Position::MAX);
            self.fail_overflow();
            return;
        }
        let start_pos = dest_pos + self.base_pos;
        let room = usize::try_from(Position::MAX - start_pos)
            .unwrap_or(usize::MAX)
            .min(limit - cursor);
        self.base.set_buffer(cursor, room, 0);
        self.base.set_start_pos(start_pos);
        if let Some(status) = failure {
            let status = self.annotate_over_dest(status);
            self.fail_without_annotation(status);
        }
    }

    fn annotate_over_dest(&self, status: Status) -> Status {
        status.annotate(format!("at shifted byte {}", self.base.pos()))
    }

    fn forward<T>(&self, result: Result<T>) -> Result<T> {
        result.map_err(|status| self.base.object().status().cloned().unwrap_or(status))
    }
}

impl<D> Writer for PositionShiftingWriter<D>
where
    D: Dependency,
    D::Target: Writer,
{
    fn base(&self) -> &WriterBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WriterBase {
        &mut self.base
    }

    fn buffer_mut(&mut self) -> &mut [u8] {
        self.dest.get_mut().buffer_mut()
    }

    fn push_slow(&mut self, min_length: usize, recommended_length: usize) -> Result<()> {
        self.base.object().check()?;
        self.sync_buffer();
        let result = self.dest.get_mut().push(min_length, recommended_length);
        self.make_buffer();
        self.forward(result)
    }

    fn write_slow(&mut self, src: &[u8]) -> Result<()> {
        self.base.object().check()?;
        if src.len() as Position > Position::MAX - self.base.pos() {
            return Err(self.fail_overflow());
        }
        self.sync_buffer();
        let result = self.dest.get_mut().write(src);
        self.make_buffer();
        self.forward(result)
    }

    fn flush_impl(&mut self, flush_type: FlushType) -> Result<()> {
        self.base.object().check()?;
        self.sync_buffer();
        let result = self.dest.get_mut().flush(flush_type);
        self.make_buffer();
        self.forward(result)
    }

    fn seek_slow(&mut self, new_pos: Position) -> Result<bool> {
        if new_pos < self.base_pos {
            return Err(self.fail(underflow(new_pos, self.base_pos)));
        }
        self.sync_buffer();
        let result = self.dest.get_mut().seek(new_pos - self.base_pos);
        self.make_buffer();
        self.forward(result)
    }

    fn size_impl(&mut self) -> Result<Position> {
        self.sync_buffer();
        let result = self.dest.get_mut().size();
        self.make_buffer();
        let size = self.forward(result)?;
        match size.checked_add(self.base_pos) {
            Some(size) => Ok(size),
            None => Err(self.fail_overflow()),
        }
    }

    fn truncate_impl(&mut self, new_size: Position) -> Result<bool> {
        if new_size < self.base_pos {
            return Err(self.fail(underflow(new_size, self.base_pos)));
        }
        self.sync_buffer();
        let result = self.dest.get_mut().truncate(new_size - self.base_pos);
        self.make_buffer();
        self.forward(result)
    }

    fn read_mode_impl(&mut self, initial_pos: Position) -> Result<Box<dyn Reader + '_>> {
        if initial_pos < self.base_pos {
            return Err(self.fail(underflow(initial_pos, self.base_pos)));
        }
        self.sync_buffer();
        // The reader borrows dest until it is dropped, so the window cannot
        // be refreshed here; leave it empty and refresh on the next push.
        self.base.discard_buffer();
        let base_pos = self.base_pos;
        let src = self.dest.get_mut().read_mode(initial_pos - base_pos)?;
        Ok(Box::new(PositionShiftingReader::new(
            src,
            PositionShiftingOptions { base_pos },
        )))
    }

    fn random_access_support(&mut self) -> Support {
        self.dest.get_mut().random_access_support()
    }

    fn size_support(&mut self) -> Support {
        self.dest.get_mut().size_support()
    }

    fn truncate_support(&mut self) -> Support {
        self.dest.get_mut().truncate_support()
    }

    fn read_mode_support(&mut self) -> Support {
        self.dest.get_mut().read_mode_support()
    }

    fn done(&mut self) {
        self.sync_buffer();
        if self.dest.is_owning() {
            if let Err(status) = self.dest.get_mut().close() {
                let status = self.annotate_over_dest(status);
                self.fail_without_annotation(status);
            }
        }
    }
}

impl<D> Drop for PositionShiftingWriter<D>
where
    D: Dependency,
    D::Target: Writer,
{
    fn drop(&mut self) {
        close_writer_on_drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{BytesReader, SliceReader, VecWriter};
    use bytes::Bytes;
    use proptest::prelude::*;
    use strata_base::{ErrorKind, Owned};

    fn shifted(base_pos: Position) -> PositionShiftingOptions {
        PositionShiftingOptions { base_pos }
    }

    #[test]
    fn writer_reports_shifted_positions() {
        let mut out = Vec::new();
        let mut inner = VecWriter::new(&mut out);
        {
            let mut writer = PositionShiftingWriter::new(&mut inner, shifted(1000));
            assert_eq!(writer.pos(), 1000);
            writer.write(b"abc").unwrap();
            assert_eq!(writer.pos(), 1003);
            writer.close().unwrap();
        }
        assert_eq!(inner.pos(), 3);
        inner.close().unwrap();
        drop(inner);
        assert_eq!(out, b"abc");
    }

    #[test]
    fn writer_seek_below_base_underflows() {
        let mut writer = PositionShiftingWriter::new(Owned(VecWriter::new(Owned(Vec::new()))), shifted(10));
        writer.write(b"0123").unwrap();
        assert!(writer.seek(12).unwrap());
        let err = writer.seek(9).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Underflow);
        assert!(!writer.ok());
        assert_eq!(writer.available(), 0);
        assert_eq!(writer.write(b"x").unwrap_err(), err);
        writer.with_dest(|dest| assert!(dest.ok()));
        assert_eq!(writer.available(), 0);
        assert_eq!(writer.write_byte(b'x').unwrap_err(), err);
    }

    #[test]
    fn writer_base_near_max_overflows() {
        let mut writer = PositionShiftingWriter::new(
            Owned(VecWriter::new(Owned(Vec::new()))),
            shifted(Position::MAX - 2),
        );
        writer.write(b"ab").unwrap();
        let err = writer.write(b"cd").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Overflow);
    }

    #[test]
    fn writer_size_truncate_and_read_mode() {
        let mut writer = PositionShiftingWriter::new(Owned(VecWriter::new(Owned(Vec::new()))), shifted(100));
        writer.write(b"hello world").unwrap();
        assert_eq!(writer.size().unwrap(), 111);
        assert!(writer.truncate(105).unwrap());
        assert_eq!(writer.pos(), 105);
        {
            let mut reader = writer.read_mode(101).unwrap();
            assert_eq!(reader.pos(), 101);
            let mut out = Vec::new();
            assert!(!reader.read_to_vec(10, &mut out).unwrap());
            assert_eq!(out, b"ello");
        }
        writer.write(b"!").unwrap();
        assert_eq!(writer.pos(), 106);
        assert_eq!(writer.read_mode(50).err().map(|err| err.kind()), Some(ErrorKind::Underflow));
    }

    #[test]
    fn with_dest_sees_handed_over_data() {
        let mut writer = PositionShiftingWriter::new(Owned(VecWriter::new(Owned(Vec::new()))), shifted(7));
        writer.write(b"xyz").unwrap();
        let inner_pos = writer.with_dest(|dest| {
            dest.write(b"!").unwrap();
            dest.pos()
        });
        assert_eq!(inner_pos, 4);
        assert_eq!(writer.pos(), 11);
    }

    #[test]
    fn reader_reports_shifted_positions() {
        let data = b"0123456789";
        let mut reader = PositionShiftingReader::new(Owned(SliceReader::new(data)), shifted(50));
        assert_eq!(reader.pos(), 50);
        assert!(reader.seek(55).unwrap());
        assert_eq!(reader.read_byte().unwrap(), Some(b'5'));
        assert_eq!(reader.size().unwrap(), 60);
        assert!(!reader.seek(70).unwrap());
        assert_eq!(reader.pos(), 60);
        let err = reader.seek(10).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Underflow);
    }

    #[test]
    fn reader_forks_keep_the_shift() {
        let mut reader =
            PositionShiftingReader::new(Owned(BytesReader::new(Bytes::from_static(b"abcdef"))), shifted(3));
        let mut fork = reader.new_reader(5).unwrap();
        assert_eq!(fork.pos(), 5);
        assert_eq!(fork.read_byte().unwrap(), Some(b'c'));
    }

    #[test]
    fn closing_owner_closes_inner() {
        let mut writer =
            PositionShiftingWriter::new(Box::new(VecWriter::new(Owned(Vec::new()))) as Box<dyn Writer>, shifted(1));
        writer.write(b"data").unwrap();
        writer.close().unwrap();
        assert!(!writer.dest().get().is_open());
    }

    proptest! {
        #[test]
        fn shifted_position_tracks_inner(
            base_pos in 0u64..1_000_000,
            ops in prop::collection::vec((0u8..3, 0usize..3000), 1..30),
        ) {
            let mut inner = VecWriter::new(Owned(Vec::new()));
            let mut model: Vec<u8> = Vec::new();
            let mut model_pos = 0usize;
            {
                let mut writer = PositionShiftingWriter::new(&mut inner, shifted(base_pos));
                for (op, n) in ops {
                    match op {
                        0 => {
                            let data = vec![n as u8; n];
                            writer.write(&data).unwrap();
                            let end = model_pos + n;
                            if model.len() < end {
                                model.resize(end, 0);
                            }
                            model[model_pos..end].copy_from_slice(&data);
                            model_pos = end;
                        }
                        1 => {
                            let target = n.min(model.len());
                            prop_assert!(writer.seek(base_pos + target as Position).unwrap());
                            model_pos = target;
                        }
                        _ => {
                            writer.write_zeros(n as Position).unwrap();
                            let end = model_pos + n;
                            if model.len() < end {
                                model.resize(end, 0);
                            }
                            model[model_pos..end].fill(0);
                            model_pos = end;
                        }
                    }
                    prop_assert_eq!(writer.pos(), base_pos + model_pos as Position);
                    let inner_pos = writer.with_dest(|dest| dest.pos());
                    prop_assert_eq!(writer.pos(), inner_pos + base_pos);
                }
                writer.close().unwrap();
            }
            inner.close().unwrap();
            prop_assert_eq!(inner.dest().get(), &model);
        }
    }
}
