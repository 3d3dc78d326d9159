use strata_base::{Dependency, Position, Result, Status, Support};

use crate::options::LimitingReaderOptions;
use crate::reader::{close_on_drop, Reader, ReaderBase};

/// A [`Reader`] which stops at `max_pos` of `src`, as if the data ended
/// there.
///
/// With `exact`, `src` ending before `max_pos` is `DataLoss` and `size()`
/// is known to be `max_pos` up front. Reading through a borrowed `src`
/// leaves it positioned where this reader stopped.
pub struct LimitingReader<D>
where
    D: Dependency,
    D::Target: Reader,
{
    base: ReaderBase,
    src: D,
    max_pos: Position,
    exact: bool,
}

impl<D> LimitingReader<D>
where
    D: Dependency,
    D::Target: Reader,
{
    pub fn new(src: D, options: LimitingReaderOptions) -> Self {
        let mut reader = Self {
            base: ReaderBase::new(),
            src,
            max_pos: Position::MAX,
            exact: options.exact,
        };
        let pos = reader.src.get().pos();
        let max_pos = match (options.max_length, options.max_pos) {
            (Some(max_length), _) => match pos.checked_add(max_length) {
                Some(max_pos) => max_pos,
                None => {
                    reader.make_buffer();
                    reader.fail_overflow();
                    return reader;
                }
            },
            (None, Some(max_pos)) => max_pos,
            (None, None) => Position::MAX,
        };
        if max_pos < pos {
            reader.make_buffer();
            reader.fail(Status::invalid_argument(format!(
                "max_pos {max_pos} is before the current position {pos}"
            )));
            return reader;
        }
        reader.max_pos = max_pos;
        reader.make_buffer();
        reader
    }

    pub fn max_pos(&self) -> Position {
        self.max_pos
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

    /// Adopts the window of `src`, clipped at `max_pos`.
    fn make_buffer(&mut self) {
        let src = self.src.get();
        let src_base = src.base();
        let failure = src.status().cloned();
        let excess = src_base
            .limit_pos()
            .saturating_sub(self.max_pos)
            .min(src_base.available() as Position) as usize;
        self.base.set_buffer(
            src_base.start(),
            src_base.start_to_limit() - excess,
            src_base.start_to_cursor(),
        );
        self.base
            .set_limit_pos(src_base.limit_pos() - excess as Position);
        if let Some(status) = failure {
            self.fail_without_annotation(status);
        }
    }

    fn forward<T>(&self, result: Result<T>) -> Result<T> {
        result.map_err(|status| self.base.object().status().cloned().unwrap_or(status))
    }

    fn fail_not_enough(&mut self) -> Status {
        let status = Status::data_loss(format!(
            "Not enough data: expected at least {} bytes, got {}",
            self.max_pos,
            self.base.pos()
        ));
        self.fail(status)
    }

    fn remaining(&self) -> Position {
        self.max_pos.saturating_sub(self.base.pos())
    }
}

impl<D> Reader for LimitingReader<D>
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
        let min_to_pull = (min_length as Position).min(self.remaining()) as usize;
        let recommended = (recommended_length as Position).min(self.remaining()) as usize;
        self.sync_buffer();
        let result = self.src.get_mut().pull(min_to_pull, recommended);
        self.make_buffer();
        if !self.forward(result)? {
            if self.exact {
                return Err(self.fail_not_enough());
            }
            return Ok(false);
        }
        Ok(self.base.available() >= min_length)
    }

    fn read_slow(&mut self, dest: &mut [u8]) -> Result<bool> {
        self.base.object().check()?;
        let length = (dest.len() as Position).min(self.remaining()) as usize;
        self.sync_buffer();
        let result = self.src.get_mut().read(&mut dest[..length]);
        self.make_buffer();
        if !self.forward(result)? {
            if self.exact {
                return Err(self.fail_not_enough());
            }
            return Ok(false);
        }
        Ok(length == dest.len())
    }

    fn seek_slow(&mut self, new_pos: Position) -> Result<bool> {
        self.base.object().check()?;
        let target = new_pos.min(self.max_pos);
        self.sync_buffer();
        let result = self.src.get_mut().seek(target);
        self.make_buffer();
        if !self.forward(result)? {
            if self.exact {
                return Err(self.fail_not_enough());
            }
            return Ok(false);
        }
        Ok(target == new_pos)
    }

    fn size_impl(&mut self) -> Result<Position> {
        if self.exact {
            return Ok(self.max_pos);
        }
        self.sync_buffer();
        let result = self.src.get_mut().size();
        self.make_buffer();
        Ok(self.forward(result)?.min(self.max_pos))
    }

    fn new_reader_impl(&mut self, initial_pos: Position) -> Result<Box<dyn Reader + Send>> {
        self.sync_buffer();
        let result = self.src.get_mut().new_reader(initial_pos.min(self.max_pos));
        self.make_buffer();
        let src = self.forward(result)?;
        let options = LimitingReaderOptions {
            max_pos: Some(self.max_pos),
            max_length: None,
            exact: self.exact,
        };
        Ok(Box::new(LimitingReader::new(src, options)))
    }

    fn random_access_support(&mut self) -> Support {
        self.src.get_mut().random_access_support()
    }

    fn rewind_support(&mut self) -> Support {
        self.src.get_mut().rewind_support()
    }

    fn size_support(&mut self) -> Support {
        if self.exact {
            return Ok(());
        }
        self.src.get_mut().size_support()
    }

    fn new_reader_support(&mut self) -> Support {
        self.src.get_mut().new_reader_support()
    }

    fn done(&mut self) {
        self.sync_buffer();
        if self.src.is_owning() {
            if let Err(status) = self.src.get_mut().close() {
                self.fail_without_annotation(status);
            }
        }
    }
}

impl<D> Drop for LimitingReader<D>
where
    D: Dependency,
    D::Target: Reader,
{
    fn drop(&mut self) {
        close_on_drop(self);
    }
}
