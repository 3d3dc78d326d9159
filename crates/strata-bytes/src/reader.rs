use strata_base::{ObjectState, Position, Result, State, Status, Support};

use crate::writer::Writer;

/// Buffer window and position state shared by every [`Reader`].
///
/// `start`, `cursor`, and `limit` are offsets into the memory returned by
/// [`Reader::buffer`]; `[cursor, limit)` is buffered data not yet read.
/// `limit_pos` is the absolute position of `limit`.
///
/// Invariants: `start <= cursor <= limit`, `limit_pos >= limit - start`,
/// and a closed reader has an empty window.
#[derive(Clone, Debug, Default)]
pub struct ReaderBase {
    object: ObjectState,
    start: usize,
    cursor: usize,
    limit: usize,
    limit_pos: Position,
}

impl ReaderBase {
    /// Window state of a freshly bound reader positioned at 0.
    pub fn new() -> Self {
        Self {
            object: ObjectState::open(),
            ..Self::default()
        }
    }

    /// Window state of an inert, closed reader.
    pub fn closed() -> Self {
        Self::default()
    }

    pub fn object(&self) -> &ObjectState {
        &self.object
    }

    pub fn object_mut(&mut self) -> &mut ObjectState {
        &mut self.object
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Buffered bytes not yet read.
    pub fn available(&self) -> usize {
        self.limit - self.cursor
    }

    pub fn start_to_limit(&self) -> usize {
        self.limit - self.start
    }

    pub fn start_to_cursor(&self) -> usize {
        self.cursor - self.start
    }

    pub fn pos(&self) -> Position {
        self.limit_pos - self.available() as Position
    }

    pub fn start_pos(&self) -> Position {
        self.limit_pos - self.start_to_limit() as Position
    }

    pub fn limit_pos(&self) -> Position {
        self.limit_pos
    }

    /// Points the window at `[start, start + start_to_limit)` with the cursor
    /// `start_to_cursor` bytes in. `limit_pos` is left unchanged.
    pub fn set_buffer(&mut self, start: usize, start_to_limit: usize, start_to_cursor: usize) {
        debug_assert!(start_to_cursor <= start_to_limit, "cursor beyond limit");
        self.start = start;
        self.cursor = start + start_to_cursor;
        self.limit = start + start_to_limit;
    }

    /// Empties the window, keeping the current position.
    pub fn discard_buffer(&mut self) {
        self.limit_pos = self.pos();
        self.start = 0;
        self.cursor = 0;
        self.limit = 0;
    }

    pub fn set_cursor(&mut self, cursor: usize) {
        debug_assert!(
            self.start <= cursor && cursor <= self.limit,
            "cursor {cursor} outside window [{}, {}]",
            self.start,
            self.limit
        );
        self.cursor = cursor;
    }

    pub fn move_cursor(&mut self, length: usize) {
        debug_assert!(length <= self.available(), "moved cursor past limit");
        self.cursor += length;
    }

    pub fn set_limit_pos(&mut self, limit_pos: Position) {
        self.limit_pos = limit_pos;
    }

    pub fn move_limit_pos(&mut self, length: usize) {
        debug_assert!(
            length as Position <= Position::MAX - self.limit_pos,
            "limit_pos overflow"
        );
        self.limit_pos += length as Position;
    }

    /// Restores a freshly constructed state, keeping nothing of the old
    /// binding.
    pub fn reset(&mut self, open: bool) {
        *self = Self::default();
        self.object.reset(open);
    }

    /// Records a failure and empties the window, so that the fast paths of
    /// every operation fall through to the slow paths, which report it.
    /// The position is kept. Returns the status in effect.
    pub fn fail(&mut self, status: Status) -> Status {
        let status = self.object.fail(status);
        self.discard_buffer();
        status
    }

    fn mark_done(&mut self) {
        self.discard_buffer();
        self.object.mark_closed();
    }
}

/// A source of bytes with a buffer window, an absolute position, and
/// optional capabilities.
///
/// Implementors provide the window state ([`Reader::base`]), the memory the
/// window points into ([`Reader::buffer`]), and [`Reader::pull_slow`]. The
/// provided methods implement the contract on top:
///
/// - `Ok(true)`: the operation succeeded.
/// - `Ok(false)`: clean end of data; [`Reader::ok`] is still `true`.
/// - `Err(status)`: failure. Failures other than capability denials are
///   sticky; every later operation returns the same status until reset.
///
/// Capability denials (seeking backwards on a pipe, asking a pipe for its
/// size) return the memoized reason without failing the reader.
pub trait Reader {
    fn base(&self) -> &ReaderBase;

    fn base_mut(&mut self) -> &mut ReaderBase;

    /// Memory indexed by the window offsets in [`Reader::base`].
    fn buffer(&self) -> &[u8];

    /// Makes at least `min_length` bytes available, preferably
    /// `recommended_length`.
    ///
    /// Precondition: `available() < min_length`.
    fn pull_slow(&mut self, min_length: usize, recommended_length: usize) -> Result<bool>;

    /// Reads `dest.len()` bytes when more are needed than the window holds.
    ///
    /// Precondition: `available() < dest.len()`.
    fn read_slow(&mut self, dest: &mut [u8]) -> Result<bool> {
        let mut filled = 0;
        loop {
            let available = self.base().available();
            let length = available.min(dest.len() - filled);
            let cursor = self.base().cursor();
            dest[filled..filled + length].copy_from_slice(&self.buffer()[cursor..cursor + length]);
            self.base_mut().move_cursor(length);
            filled += length;
            if filled == dest.len() {
                return Ok(true);
            }
            if !self.pull_slow(1, dest.len() - filled)? {
                return Ok(false);
            }
        }
    }

    /// Seeks outside the current window.
    ///
    /// By default a forward seek reads and discards intervening data and a
    /// backward seek is unsupported.
    fn seek_slow(&mut self, new_pos: Position) -> Result<bool> {
        self.base().object().check()?;
        if new_pos < self.base().start_pos() {
            let reason = self
                .rewind_support()
                .err()
                .unwrap_or_else(|| Status::unsupported("Reader::seek() backwards not supported"));
            return Err(self.annotate(reason));
        }
        skip_forward(self, new_pos)
    }

    fn size_impl(&mut self) -> Result<Position> {
        Err(Status::unsupported("Reader::size() not supported"))
    }

    fn new_reader_impl(&mut self, _initial_pos: Position) -> Result<Box<dyn Reader + Send>> {
        Err(Status::unsupported("Reader::new_reader() not supported"))
    }

    /// Efficient seeking in both directions, and `size()`.
    fn random_access_support(&mut self) -> Support {
        Err(Status::unsupported("Reader::seek() backwards not supported"))
    }

    /// Seeking backwards, possibly inefficiently.
    fn rewind_support(&mut self) -> Support {
        self.random_access_support()
    }

    fn size_support(&mut self) -> Support {
        self.random_access_support()
    }

    /// Forking an independent reader over the same content.
    fn new_reader_support(&mut self) -> Support {
        Err(Status::unsupported("Reader::new_reader() not supported"))
    }

    /// Finalizes the reader and releases owned resources. Failures are
    /// recorded with [`Reader::fail`]. Called once, by [`Reader::close`].
    fn done(&mut self) {}

    /// Adds this layer's context to a failure.
    fn annotate(&self, status: Status) -> Status {
        if self.base().object().is_open() {
            status.annotate(format!("at byte {}", self.pos()))
        } else {
            status
        }
    }

    // Provided operations.

    fn ok(&self) -> bool {
        self.base().object().ok()
    }

    fn is_open(&self) -> bool {
        self.base().object().is_open()
    }

    fn state(&self) -> State {
        self.base().object().state()
    }

    /// The recorded failure, if any.
    fn status(&self) -> Option<&Status> {
        self.base().object().status()
    }

    /// Records a failure annotated by this layer. The first failure wins;
    /// returns the status in effect.
    fn fail(&mut self, status: Status) -> Status {
        let status = self.annotate(status);
        self.base_mut().fail(status)
    }

    /// Records a failure which already carries this layer's context.
    fn fail_without_annotation(&mut self, status: Status) -> Status {
        self.base_mut().fail(status)
    }

    fn fail_overflow(&mut self) -> Status {
        self.fail(Status::overflow("Reader position overflow"))
    }

    fn pos(&self) -> Position {
        self.base().pos()
    }

    fn start_pos(&self) -> Position {
        self.base().start_pos()
    }

    fn limit_pos(&self) -> Position {
        self.base().limit_pos()
    }

    fn available(&self) -> usize {
        self.base().available()
    }

    /// The buffered bytes not yet read.
    fn chunk(&self) -> &[u8] {
        let base = self.base();
        &self.buffer()[base.cursor()..base.limit()]
    }

    fn move_cursor(&mut self, length: usize) {
        self.base_mut().move_cursor(length);
    }

    fn set_cursor(&mut self, cursor: usize) {
        self.base_mut().set_cursor(cursor);
    }

    /// Ensures `available() >= min_length` unless the source ends.
    ///
    /// `recommended_length` is a hint for how much the caller expects to
    /// consume.
    fn pull(&mut self, min_length: usize, recommended_length: usize) -> Result<bool> {
        if self.base().available() >= min_length {
            return Ok(true);
        }
        self.pull_slow(min_length, recommended_length.max(min_length))
    }

    /// Fills `dest` completely. Returns `Ok(false)` if the source ends first;
    /// `pos()` then tells how much was read.
    fn read(&mut self, dest: &mut [u8]) -> Result<bool> {
        let base = self.base();
        if dest.len() <= base.available() {
            let cursor = base.cursor();
            dest.copy_from_slice(&self.buffer()[cursor..cursor + dest.len()]);
            self.base_mut().move_cursor(dest.len());
            return Ok(true);
        }
        self.read_slow(dest)
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        if !self.pull(1, 0)? {
            return Ok(None);
        }
        let byte = self.buffer()[self.base().cursor()];
        self.base_mut().move_cursor(1);
        Ok(Some(byte))
    }

    /// Appends exactly `length` bytes to `dest`, or as many as the source
    /// has before it ends.
    fn read_to_vec(&mut self, length: usize, dest: &mut Vec<u8>) -> Result<bool> {
        let old_len = dest.len();
        dest.resize(old_len + length, 0);
        let pos_before = self.pos();
        let result = self.read(&mut dest[old_len..]);
        let length_read = (self.pos() - pos_before) as usize;
        dest.truncate(old_len + length_read);
        result
    }

    /// Copies `length` bytes to `dest`.
    fn copy_to(&mut self, mut length: Position, dest: &mut dyn Writer) -> Result<bool> {
        loop {
            let available = self.base().available();
            let chunk = (available as Position).min(length) as usize;
            let cursor = self.base().cursor();
            dest.write(&self.buffer()[cursor..cursor + chunk])?;
            self.base_mut().move_cursor(chunk);
            length -= chunk as Position;
            if length == 0 {
                return Ok(true);
            }
            let recommended = usize::try_from(length).unwrap_or(usize::MAX);
            if !self.pull_slow(1, recommended)? {
                return Ok(false);
            }
        }
    }

    /// Advances by `length`. Returns `Ok(false)` if the source ends first,
    /// leaving the position at the end.
    fn skip(&mut self, length: Position) -> Result<bool> {
        if length <= self.base().available() as Position {
            self.base_mut().move_cursor(length as usize);
            return Ok(true);
        }
        match self.pos().checked_add(length) {
            Some(new_pos) => self.seek_slow(new_pos),
            None => Err(self.fail_overflow()),
        }
    }

    /// Sets the position. Returns `Ok(false)` if the source ends before
    /// `new_pos`, leaving the position at the end.
    ///
    /// Seeking within the window never touches the backend.
    fn seek(&mut self, new_pos: Position) -> Result<bool> {
        let base = self.base();
        if base.start_to_limit() == 0 {
            // Also the state of a failed reader.
            base.object().check()?;
        }
        if new_pos >= base.start_pos() && new_pos <= base.limit_pos() {
            let cursor = base.limit() - (base.limit_pos() - new_pos) as usize;
            self.base_mut().set_cursor(cursor);
            return Ok(true);
        }
        self.seek_slow(new_pos)
    }

    /// Total length of the source.
    fn size(&mut self) -> Result<Position> {
        self.base().object().check()?;
        if let Err(reason) = self.size_support() {
            return Err(self.annotate(reason));
        }
        self.size_impl()
    }

    /// A reader over the same content with an independent position,
    /// starting at `initial_pos`.
    ///
    /// The returned reader owns everything it needs and may be moved to
    /// another thread; several forks may traverse the content concurrently.
    fn new_reader(&mut self, initial_pos: Position) -> Result<Box<dyn Reader + Send>> {
        self.base().object().check()?;
        if let Err(reason) = self.new_reader_support() {
            return Err(self.annotate(reason));
        }
        self.new_reader_impl(initial_pos)
    }

    fn supports_random_access(&mut self) -> bool {
        self.random_access_support().is_ok()
    }

    fn supports_rewind(&mut self) -> bool {
        self.rewind_support().is_ok()
    }

    fn supports_size(&mut self) -> bool {
        self.size_support().is_ok()
    }

    fn supports_new_reader(&mut self) -> bool {
        self.new_reader_support().is_ok()
    }

    /// Fails with `InvalidArgument` unless the source ends at the current
    /// position.
    fn verify_end(&mut self) -> Result<()> {
        if self.pull(1, 0)? {
            let mut status = Status::invalid_argument("End of data expected");
            if self.supports_size() {
                if let Ok(size) = self.size() {
                    status = status
                        .annotate(format!("remaining length: {}", size.saturating_sub(self.pos())));
                }
            }
            return Err(self.fail(status));
        }
        Ok(())
    }

    /// Finalizes the reader and transitions it to closed. Returns the
    /// recorded failure, if any. Closing twice is harmless.
    fn close(&mut self) -> Result<()> {
        if self.base().object().is_open() {
            self.done();
            self.base_mut().mark_done();
        }
        match self.base().object().status() {
            Some(status) => Err(status.clone()),
            None => Ok(()),
        }
    }
}

/// Moves forward to `new_pos` by discarding buffered data and pulling more,
/// for readers without random access.
pub fn skip_forward<R: Reader + ?Sized>(reader: &mut R, new_pos: Position) -> Result<bool> {
    loop {
        let base = reader.base();
        if new_pos <= base.limit_pos() {
            let cursor = base.limit() - (base.limit_pos() - new_pos) as usize;
            reader.base_mut().set_cursor(cursor);
            return Ok(true);
        }
        let recommended = usize::try_from(new_pos - base.limit_pos()).unwrap_or(usize::MAX);
        let limit = base.limit();
        reader.base_mut().set_cursor(limit);
        if !reader.pull_slow(1, recommended)? {
            return Ok(false);
        }
    }
}

/// Closes `reader` if it is still open, for `Drop` implementations.
///
/// A failure which first appears during this implicit close is a bug in the
/// caller, who should have closed explicitly and checked the result.
pub fn close_on_drop<R: Reader + ?Sized>(reader: &mut R) {
    if !reader.is_open() {
        return;
    }
    let was_ok = reader.ok();
    if let Err(status) = reader.close() {
        if was_ok {
            tracing::warn!(%status, "reader failed while closing on drop");
            debug_assert!(
                std::thread::panicking(),
                "reader failed while closing on drop: {status}"
            );
        }
    }
}
