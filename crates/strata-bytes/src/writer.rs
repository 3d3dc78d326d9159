use serde::{Deserialize, Serialize};
use strata_base::{ObjectState, Position, Result, State, Status, Support};

use crate::reader::Reader;

/// How far buffered data should be pushed by [`Writer::flush`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushType {
    /// Make data visible to other handles of this object only.
    FromObject,
    /// Survive the process dying: hand data to the OS.
    #[default]
    FromProcess,
    /// Survive the machine dying: push data to durable storage.
    FromMachine,
}

/// Buffer window and position state shared by every [`Writer`].
///
/// `start`, `cursor`, and `limit` are offsets into the memory returned by
/// [`Writer::buffer_mut`]; `[start, cursor)` holds written data not yet
/// handed downstream and `[cursor, limit)` is free space. `start_pos` is the
/// absolute position of `start`.
#[derive(Clone, Debug, Default)]
pub struct WriterBase {
    object: ObjectState,
    start: usize,
    cursor: usize,
    limit: usize,
    start_pos: Position,
}

impl WriterBase {
    pub fn new() -> Self {
        Self {
            object: ObjectState::open(),
            ..Self::default()
        }
    }

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

    /// Free space in the window.
    pub fn available(&self) -> usize {
        self.limit - self.cursor
    }

    pub fn start_to_cursor(&self) -> usize {
        self.cursor - self.start
    }

    pub fn start_to_limit(&self) -> usize {
        self.limit - self.start
    }

    pub fn pos(&self) -> Position {
        self.start_pos + self.start_to_cursor() as Position
    }

    pub fn start_pos(&self) -> Position {
        self.start_pos
    }

    pub fn limit_pos(&self) -> Position {
        self.start_pos + self.start_to_limit() as Position
    }

    /// Points the window at `[start, start + start_to_limit)` with the cursor
    /// `start_to_cursor` bytes in. `start_pos` is left unchanged.
    pub fn set_buffer(&mut self, start: usize, start_to_limit: usize, start_to_cursor: usize) {
        debug_assert!(start_to_cursor <= start_to_limit, "cursor beyond limit");
        self.start = start;
        self.cursor = start + start_to_cursor;
        self.limit = start + start_to_limit;
    }

    /// Empties the window, keeping the current position.
    pub fn discard_buffer(&mut self) {
        self.start_pos = self.pos();
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

    pub fn set_start_pos(&mut self, start_pos: Position) {
        self.start_pos = start_pos;
    }

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

/// A sink of bytes with a buffer window, an absolute position, and optional
/// capabilities.
///
/// Implementors provide the window state, the memory the window points into,
/// and [`Writer::push_slow`]. Results follow the [`Reader`] conventions:
/// `Err` is sticky except for capability denials, and `Ok(false)` from
/// [`Writer::seek`] or [`Writer::truncate`] means the destination is shorter
/// than requested.
pub trait Writer {
    fn base(&self) -> &WriterBase;

    fn base_mut(&mut self) -> &mut WriterBase;

    /// Memory indexed by the window offsets in [`Writer::base`].
    fn buffer_mut(&mut self) -> &mut [u8];

    /// Makes at least `min_length` bytes of free space available.
    ///
    /// Precondition: `available() < min_length`, and `min_length` does not
    /// overflow the position.
    fn push_slow(&mut self, min_length: usize, recommended_length: usize) -> Result<()>;

    /// Writes `src` when it does not fit the free space.
    ///
    /// Precondition: `available() < src.len()`.
    fn write_slow(&mut self, src: &[u8]) -> Result<()> {
        let mut written = 0;
        loop {
            let length = self.base().available().min(src.len() - written);
            let cursor = self.base().cursor();
            self.buffer_mut()[cursor..cursor + length]
                .copy_from_slice(&src[written..written + length]);
            self.base_mut().move_cursor(length);
            written += length;
            if written == src.len() {
                return Ok(());
            }
            self.push(1, src.len() - written)?;
        }
    }

    fn flush_impl(&mut self, _flush_type: FlushType) -> Result<()> {
        self.base().object().check()
    }

    fn seek_slow(&mut self, _new_pos: Position) -> Result<bool> {
        Err(Status::unsupported("Writer::seek() not supported"))
    }

    fn size_impl(&mut self) -> Result<Position> {
        Err(Status::unsupported("Writer::size() not supported"))
    }

    fn truncate_impl(&mut self, _new_size: Position) -> Result<bool> {
        Err(Status::unsupported("Writer::truncate() not supported"))
    }

    fn read_mode_impl(&mut self, _initial_pos: Position) -> Result<Box<dyn Reader + '_>> {
        Err(Status::unsupported("Writer::read_mode() not supported"))
    }

    fn random_access_support(&mut self) -> Support {
        Err(Status::unsupported("Writer::seek() not supported"))
    }

    fn size_support(&mut self) -> Support {
        self.random_access_support()
    }

    fn truncate_support(&mut self) -> Support {
        Err(Status::unsupported("Writer::truncate() not supported"))
    }

    fn read_mode_support(&mut self) -> Support {
        Err(Status::unsupported("Writer::read_mode() not supported"))
    }

    /// Hands buffered data downstream and releases owned resources.
    /// Failures are recorded with [`Writer::fail`]. Called once, by
    /// [`Writer::close`].
    fn done(&mut self) {}

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

    fn status(&self) -> Option<&Status> {
        self.base().object().status()
    }

    fn fail(&mut self, status: Status) -> Status {
        let status = self.annotate(status);
        self.base_mut().fail(status)
    }

    fn fail_without_annotation(&mut self, status: Status) -> Status {
        self.base_mut().fail(status)
    }

    fn fail_overflow(&mut self) -> Status {
        self.fail(Status::overflow("Writer position overflow"))
    }

    fn pos(&self) -> Position {
        self.base().pos()
    }

    fn start_pos(&self) -> Position {
        self.base().start_pos()
    }

    fn available(&self) -> usize {
        self.base().available()
    }

    fn move_cursor(&mut self, length: usize) {
        self.base_mut().move_cursor(length);
    }

    fn set_cursor(&mut self, cursor: usize) {
        self.base_mut().set_cursor(cursor);
    }

    /// The free space, to be filled and then committed with
    /// [`Writer::move_cursor`].
    fn chunk_mut(&mut self) -> &mut [u8] {
        let (cursor, limit) = (self.base().cursor(), self.base().limit());
        &mut self.buffer_mut()[cursor..limit]
    }

    /// Ensures `available() >= min_length`.
    fn push(&mut self, min_length: usize, recommended_length: usize) -> Result<()> {
        if self.base().available() >= min_length {
            return Ok(());
        }
        if min_length as Position > Position::MAX - self.pos() {
            return Err(self.fail_overflow());
        }
        self.push_slow(min_length, recommended_length.max(min_length))
    }

    fn write(&mut self, src: &[u8]) -> Result<()> {
        if src.len() <= self.base().available() {
            let cursor = self.base().cursor();
            self.buffer_mut()[cursor..cursor + src.len()].copy_from_slice(src);
            self.base_mut().move_cursor(src.len());
            return Ok(());
        }
        self.write_slow(src)
    }

    fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.push(1, 0)?;
        let cursor = self.base().cursor();
        self.buffer_mut()[cursor] = byte;
        self.base_mut().move_cursor(1);
        Ok(())
    }

    fn write_zeros(&mut self, mut length: Position) -> Result<()> {
        if length > Position::MAX - self.pos() {
            return Err(self.fail_overflow());
        }
        while length > 0 {
            let recommended = usize::try_from(length).unwrap_or(usize::MAX);
            self.push(1, recommended)?;
            let chunk = (self.base().available() as Position).min(length) as usize;
            let cursor = self.base().cursor();
            self.buffer_mut()[cursor..cursor + chunk].fill(0);
            self.base_mut().move_cursor(chunk);
            length -= chunk as Position;
        }
        Ok(())
    }

    fn flush(&mut self, flush_type: FlushType) -> Result<()> {
        self.flush_impl(flush_type)
    }

    /// Sets the position. `Ok(false)` means the destination ends before
    /// `new_pos`; the position is then at the end.
    fn seek(&mut self, new_pos: Position) -> Result<bool> {
        if new_pos == self.pos() {
            self.base().object().check()?;
            return Ok(true);
        }
        self.base().object().check()?;
        if let Err(reason) = self.random_access_support() {
            return Err(self.annotate(reason));
        }
        self.seek_slow(new_pos)
    }

    fn size(&mut self) -> Result<Position> {
        self.base().object().check()?;
        if let Err(reason) = self.size_support() {
            return Err(self.annotate(reason));
        }
        self.size_impl()
    }

    /// Discards data after `new_size` and moves the position there.
    /// `Ok(false)` means the destination is shorter than `new_size`.
    fn truncate(&mut self, new_size: Position) -> Result<bool> {
        self.base().object().check()?;
        if let Err(reason) = self.truncate_support() {
            return Err(self.annotate(reason));
        }
        self.truncate_impl(new_size)
    }

    /// A reader over what has been written so far, starting at
    /// `initial_pos`.
    ///
    /// The reader borrows this writer; writing resumes when it is dropped.
    fn read_mode(&mut self, initial_pos: Position) -> Result<Box<dyn Reader + '_>> {
        self.base().object().check()?;
        if let Err(reason) = self.read_mode_support() {
            return Err(self.annotate(reason));
        }
        self.read_mode_impl(initial_pos)
    }

    fn supports_random_access(&mut self) -> bool {
        self.random_access_support().is_ok()
    }

    fn supports_size(&mut self) -> bool {
        self.size_support().is_ok()
    }

    fn supports_truncate(&mut self) -> bool {
        self.truncate_support().is_ok()
    }

    fn supports_read_mode(&mut self) -> bool {
        self.read_mode_support().is_ok()
    }

    /// Finalizes the writer, handing buffered data downstream, and
    /// transitions it to closed. Returns the recorded failure, if any.
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

/// Closes `writer` if it is still open, for `Drop` implementations.
pub fn close_on_drop<W: Writer + ?Sized>(writer: &mut W) {
    if !writer.is_open() {
        return;
    }
    let was_ok = writer.ok();
    if let Err(status) = writer.close() {
        if was_ok {
            tracing::warn!(%status, "writer failed while closing on drop");
            debug_assert!(
                std::thread::panicking(),
                "writer failed while closing on drop: {status}"
            );
        }
    }
}
