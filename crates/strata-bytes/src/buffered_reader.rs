use strata_base::{CapabilityCell, Position, Result, Status, Support};
use tracing::debug;

use crate::options::{BufferSizer, BufferedReaderOptions};
use crate::reader::{close_on_drop, skip_forward, Reader, ReaderBase};

/// Outcome of one [`ReadBackend::fill`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fill {
    /// This many bytes (at least one) were written to the front of `dest`.
    Data(usize),
    /// The source ended cleanly.
    End,
    /// The source ended in the middle of a unit of data, e.g. a compressed
    /// frame.
    Truncated,
}

/// A source which fills caller-provided memory, driven by
/// [`BufferedReader`].
///
/// Only [`ReadBackend::fill`] is required. Capabilities default to
/// unsupported.
pub trait ReadBackend {
    /// Reads data at `pos` into the front of `dest` (non-empty).
    ///
    /// `min_length` is how much the caller needs; the backend may return
    /// less and will be called again at the advanced position. Positions
    /// passed to consecutive calls are contiguous unless
    /// [`ReadBackend::seek_behind_buffer`] was called in between.
    fn fill(&mut self, pos: Position, dest: &mut [u8], min_length: usize) -> Result<Fill>;

    /// The position of the first byte [`ReadBackend::fill`] will deliver.
    fn initial_pos(&mut self) -> Result<Position> {
        Ok(0)
    }

    fn random_access_support(&mut self) -> Support {
        Err(Status::unsupported("source does not support random access"))
    }

    fn rewind_support(&mut self) -> Support {
        self.random_access_support()
    }

    fn size_support(&mut self) -> Support {
        self.random_access_support()
    }

    fn new_reader_support(&mut self) -> Support {
        Err(Status::unsupported("source does not support new_reader()"))
    }

    /// Repositions the source to `new_pos`, or to its end if it is shorter.
    /// Returns the position reached; a backend which can only rewind may
    /// return an earlier position and let the engine read forward.
    fn seek_behind_buffer(&mut self, _new_pos: Position) -> Result<Position> {
        Err(Status::unsupported("source does not support seeking"))
    }

    fn size(&mut self) -> Result<Position> {
        Err(Status::unsupported("source does not support size()"))
    }

    /// The size of the source if it is known up front, e.g. from a header.
    /// Consulted once at initialization; buffers then never exceed what is
    /// left to read.
    fn known_size(&mut self) -> Option<Position> {
        None
    }

    /// An independent reader over the same source at `initial_pos`.
    fn new_reader(
        &mut self,
        _initial_pos: Position,
        _options: &BufferedReaderOptions,
    ) -> Result<Box<dyn Reader + Send>> {
        Err(Status::unsupported("source does not support new_reader()"))
    }

    /// The failure reported when the source is truncated.
    fn truncated_status(&self) -> Status {
        Status::data_loss("Truncated source")
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Adds the backend's context, e.g. a file name, to a failure.
    fn annotate(&self, status: Status) -> Status {
        status
    }

    /// Adds the current position to a failure.
    fn annotate_at(&self, status: Status, pos: Position) -> Status {
        status.annotate(format!("at byte {pos}"))
    }
}

enum Stop {
    Satisfied,
    End,
    Truncated,
    Failed(Status),
}

/// Calls `backend.fill` until `min_length` bytes are in `dest` or the
/// source stops. Returns the bytes filled even when it stops early.
fn fill_run<B: ReadBackend>(
    backend: &mut B,
    pos: Position,
    dest: &mut [u8],
    min_length: usize,
) -> (usize, Stop) {
    let mut filled = 0;
    while filled < min_length {
        let next_pos = pos + filled as Position;
        match backend.fill(next_pos, &mut dest[filled..], min_length - filled) {
            Ok(Fill::Data(0)) => {
                return (filled, Stop::Failed(Status::internal("backend filled no data")));
            }
            Ok(Fill::Data(length)) => {
                debug_assert!(filled + length <= dest.len(), "backend overfilled");
                filled += length;
            }
            Ok(Fill::End) => return (filled, Stop::End),
            Ok(Fill::Truncated) => return (filled, Stop::Truncated),
            Err(status) => return (filled, Stop::Failed(status)),
        }
    }
    (filled, Stop::Satisfied)
}

/// A [`Reader`] which owns a buffer and refills it from a [`ReadBackend`].
///
/// Buffers grow geometrically during sequential reads, are capped by a known
/// source size, and are bypassed for reads at least as large as the next
/// buffer would be. Forward seeks without random access are emulated by
/// reading; backward seeks need rewind support.
pub struct BufferedReader<B: ReadBackend> {
    base: ReaderBase,
    backend: B,
    buffer: Vec<u8>,
    options: BufferedReaderOptions,
    sizer: BufferSizer,
    truncated: bool,
    random_access: CapabilityCell,
    rewind: CapabilityCell,
    size: CapabilityCell,
    new_reader: CapabilityCell,
}

impl<B: ReadBackend> BufferedReader<B> {
    pub fn new(backend: B, options: BufferedReaderOptions) -> Self {
        let mut reader = Self {
            base: ReaderBase::closed(),
            backend,
            buffer: Vec::new(),
            options,
            sizer: BufferSizer::new(options.buffer),
            truncated: false,
            random_access: CapabilityCell::new(),
            rewind: CapabilityCell::new(),
            size: CapabilityCell::new(),
            new_reader: CapabilityCell::new(),
        };
        reader.initialize();
        reader
    }

    /// Rebinds to a new backend, keeping the buffer allocation.
    pub fn reset(&mut self, backend: B, options: BufferedReaderOptions) {
        self.backend = backend;
        self.options = options;
        self.sizer = BufferSizer::new(options.buffer);
        self.truncated = false;
        self.random_access.reset();
        self.rewind.reset();
        self.size.reset();
        self.new_reader.reset();
        self.initialize();
    }

    fn initialize(&mut self) {
        self.base.reset(true);
        if let Err(status) = self.options.buffer.validate() {
            self.fail(status);
            return;
        }
        let pos = match self.options.assumed_pos {
            Some(pos) => {
                let reason = Status::unsupported("assumed_pos excludes random access");
                self.random_access = CapabilityCell::known(Err(reason.clone()));
                self.rewind = CapabilityCell::known(Err(reason));
                pos
            }
            None => match self.backend.initial_pos() {
                Ok(pos) => pos,
                Err(status) => {
                    self.fail(status);
                    return;
                }
            },
        };
        self.base.set_limit_pos(pos);
        self.sizer.begin_run(pos);
        if !self.options.growing_source {
            if let Some(size) = self.backend.known_size() {
                self.sizer.set_exact_size(Some(size));
            }
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn options(&self) -> &BufferedReaderOptions {
        &self.options
    }

    /// Whether the source was last seen ending mid-unit. Only possible with
    /// a growing source; the next pull retries.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    fn at_known_end(&self) -> bool {
        !self.options.growing_source
            && self
                .sizer
                .exact_size()
                .is_some_and(|size| self.base.limit_pos() >= size)
    }

    fn finish_run(&mut self, filled: usize, stop: Stop) -> Result<()> {
        self.base.move_limit_pos(filled);
        match stop {
            Stop::Satisfied => Ok(()),
            Stop::End => {
                self.truncated = false;
                if !self.options.growing_source {
                    debug!(size = self.base.limit_pos(), "source ended; caching its size");
                    self.sizer.set_exact_size(Some(self.base.limit_pos()));
                }
                Ok(())
            }
            Stop::Truncated if self.options.growing_source => {
                debug!(pos = self.base.limit_pos(), "growing source truncated; will retry");
                self.truncated = true;
                Ok(())
            }
            Stop::Truncated => {
                let status = self.backend.truncated_status();
                Err(self.fail(status))
            }
            Stop::Failed(status) => Err(self.fail(status)),
        }
    }

    fn room_before_overflow(&self) -> usize {
        usize::try_from(Position::MAX - self.base.limit_pos()).unwrap_or(usize::MAX)
    }
}

impl<B: ReadBackend> Reader for BufferedReader<B> {
    fn base(&self) -> &ReaderBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ReaderBase {
        &mut self.base
    }

    fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    fn pull_slow(&mut self, min_length: usize, recommended_length: usize) -> Result<bool> {
        self.base.object().check()?;
        if self.at_known_end() {
            return Ok(false);
        }
        let room = self.room_before_overflow();
        if room == 0 {
            return Err(self.fail_overflow());
        }
        let available = self.base.available();
        let buffer_length =
            self.sizer
                .buffer_length(self.base.pos(), min_length, recommended_length);

        // Keep unread data, moved to the front.
        let (cursor, limit) = (self.base.cursor(), self.base.limit());
        if cursor > 0 {
            self.buffer.copy_within(cursor..limit, 0);
        }
        self.base.set_buffer(0, available, 0);
        if self.buffer.len() < buffer_length {
            self.buffer.resize(buffer_length, 0);
        }

        let room = room.min(self.buffer.len() - available);
        let needed = (min_length - available).min(room);
        let (filled, stop) = fill_run(
            &mut self.backend,
            self.base.limit_pos(),
            &mut self.buffer[available..available + room],
            needed,
        );
        self.base.set_buffer(0, available + filled, 0);
        self.finish_run(filled, stop)?;
        if self.base.available() < min_length && self.base.limit_pos() == Position::MAX {
            return Err(self.fail_overflow());
        }
        Ok(self.base.available() >= min_length)
    }

    fn read_slow(&mut self, dest: &mut [u8]) -> Result<bool> {
        let available = self.base.available();
        let cursor = self.base.cursor();
        dest[..available].copy_from_slice(&self.buffer[cursor..cursor + available]);
        self.base.move_cursor(available);
        let remaining = dest.len() - available;

        if remaining < self.sizer.buffer_length(self.base.pos(), 1, 0) {
            let mut filled = available;
            while filled < dest.len() {
                if !self.pull_slow(1, dest.len() - filled)? {
                    return Ok(false);
                }
                let length = self.base.available().min(dest.len() - filled);
                let cursor = self.base.cursor();
                dest[filled..filled + length]
                    .copy_from_slice(&self.buffer[cursor..cursor + length]);
                self.base.move_cursor(length);
                filled += length;
            }
            return Ok(true);
        }

        // Large read: fill the caller's memory directly.
        self.base.object().check()?;
        if self.at_known_end() {
            return Ok(false);
        }
        self.base.discard_buffer();
        let room = remaining.min(self.room_before_overflow());
        let (filled, stop) = fill_run(
            &mut self.backend,
            self.base.limit_pos(),
            &mut dest[available..available + room],
            room,
        );
        self.finish_run(filled, stop)?;
        if filled < remaining && self.base.limit_pos() == Position::MAX {
            return Err(self.fail_overflow());
        }
        Ok(filled == remaining)
    }

    fn seek_slow(&mut self, new_pos: Position) -> Result<bool> {
        self.base.object().check()?;
        if new_pos >= self.base.start_pos() {
            if self.random_access_support().is_err() {
                return skip_forward(self, new_pos);
            }
        } else if let Err(reason) = self.rewind_support() {
            return Err(self.annotate(reason));
        }

        self.base.discard_buffer();
        let target = match self.sizer.exact_size() {
            Some(size) if !self.options.growing_source && new_pos > size => size,
            _ => new_pos,
        };
        let reached = match self.backend.seek_behind_buffer(target) {
            Ok(reached) => reached,
            Err(status) => return Err(self.fail(status)),
        };
        self.base.set_limit_pos(reached);
        self.truncated = false;
        self.sizer.begin_run(reached);
        let mut reached_target = true;
        if reached < target {
            reached_target = skip_forward(self, target)?;
        }
        Ok(reached_target && target == new_pos)
    }

    fn size_impl(&mut self) -> Result<Position> {
        if let Some(size) = self.sizer.exact_size() {
            return Ok(size);
        }
        match self.backend.size() {
            Ok(size) => {
                if !self.options.growing_source {
                    self.sizer.set_exact_size(Some(size));
                }
                Ok(size)
            }
            Err(status) => Err(self.fail(status)),
        }
    }

    fn new_reader_impl(&mut self, initial_pos: Position) -> Result<Box<dyn Reader + Send>> {
        let options = BufferedReaderOptions {
            assumed_pos: None,
            ..self.options
        };
        match self.backend.new_reader(initial_pos, &options) {
            Ok(reader) => Ok(reader),
            Err(status) => Err(self.fail(status)),
        }
    }

    fn random_access_support(&mut self) -> Support {
        let backend = &mut self.backend;
        self.random_access
            .get_or_compute(|| backend.random_access_support())
    }

    fn rewind_support(&mut self) -> Support {
        let backend = &mut self.backend;
        self.rewind.get_or_compute(|| backend.rewind_support())
    }

    fn size_support(&mut self) -> Support {
        if self.sizer.exact_size().is_some() {
            return Ok(());
        }
        if self.options.growing_source {
            // May learn its size later, e.g. once a header is complete.
            return self.backend.size_support();
        }
        let backend = &mut self.backend;
        self.size.get_or_compute(|| backend.size_support())
    }

    fn new_reader_support(&mut self) -> Support {
        let backend = &mut self.backend;
        self.new_reader.get_or_compute(|| backend.new_reader_support())
    }

    fn done(&mut self) {
        if self.truncated {
            let status = self.backend.truncated_status();
            self.fail(status);
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

impl<B: ReadBackend> Drop for BufferedReader<B> {
    fn drop(&mut self) {
        close_on_drop(self);
    }
}
