use strata_base::{Dependency, Position, Result, Support};
use strata_bytes::writer::close_on_drop;
use strata_bytes::{FlushType, Reader, Writer, WriterBase};

use crate::digester::Digester;

/// A [`Writer`] which feeds every byte written to `dest` to a [`Digester`].
///
/// Data goes straight into the free space of `dest`; it is digested when
/// the cursor is handed back. Seeking and truncation are not supported,
/// since they would invalidate the digest.
pub struct DigestingWriter<G, D>
where
    G: Digester,
    D: Dependency,
    D::Target: Writer,
{
    base: WriterBase,
    digester: G,
    dest: D,
}

impl<G, D> DigestingWriter<G, D>
where
    G: Digester,
    D: Dependency,
    D::Target: Writer,
{
    pub fn new(digester: G, dest: D) -> Self {
        let mut writer = Self {
            base: WriterBase::new(),
            digester,
            dest,
        };
        writer.make_buffer();
        writer
    }

    /// The digest of the data written so far.
    pub fn digest(&mut self) -> G::Digest {
        if self.base.object().ok() {
            self.sync_buffer();
            self.make_buffer();
        }
        self.digester.digest()
    }

    pub fn digester(&self) -> &G {
        &self.digester
    }

    pub fn dest(&self) -> &D {
        &self.dest
    }

    fn sync_buffer(&mut self) {
        // An empty window may be stale after read mode or a failure.
        if !self.base.object().ok() || self.base.start_to_cursor() == 0 {
            return;
        }
        let (start, cursor) = (self.base.start(), self.base.cursor());
        let dest = self.dest.get_mut();
        self.digester.write(&dest.buffer_mut()[start..cursor]);
        dest.set_cursor(cursor);
        let pos = self.base.pos();
        self.base.set_buffer(cursor, 0, 0);
        self.base.set_start_pos(pos);
    }

    /// Starts a window at the cursor of `dest`.
    fn make_buffer(&mut self) {
        let dest = self.dest.get();
        let dest_base = dest.base();
        let failure = dest.status().cloned();
        self.base
            .set_buffer(dest_base.cursor(), dest_base.available(), 0);
        self.base.set_start_pos(dest_base.pos());
        if let Some(status) = failure {
            self.fail_without_annotation(status);
        }
    }

    fn forward<T>(&self, result: Result<T>) -> Result<T> {
        result.map_err(|status| self.base.object().status().cloned().unwrap_or(status))
    }
}

impl<G, D> Writer for DigestingWriter<G, D>
where
    G: Digester,
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
        self.sync_buffer();
        let result = self.dest.get_mut().write(src);
        if result.is_ok() {
            self.digester.write(src);
        }
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

    fn size_impl(&mut self) -> Result<Position> {
        self.sync_buffer();
        let result = self.dest.get_mut().size();
        self.make_buffer();
        self.forward(result)
    }

    fn read_mode_impl(&mut self, initial_pos: Position) -> Result<Box<dyn Reader + '_>> {
        self.sync_buffer();
        self.base.discard_buffer();
        self.dest.get_mut().read_mode(initial_pos)
    }

    fn size_support(&mut self) -> Support {
        self.dest.get_mut().size_support()
    }

    fn read_mode_support(&mut self) -> Support {
        self.dest.get_mut().read_mode_support()
    }

    fn done(&mut self) {
        self.sync_buffer();
        if self.dest.is_owning() {
            if let Err(status) = self.dest.get_mut().close() {
                self.fail_without_annotation(status);
            }
        }
    }
}

impl<G, D> Drop for DigestingWriter<G, D>
where
    G: Digester,
    D: Dependency,
    D::Target: Writer,
{
    fn drop(&mut self) {
        close_on_drop(self);
    }
}
