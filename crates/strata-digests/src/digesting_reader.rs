use strata_base::{Dependency, Position, Result, Support};
use strata_bytes::reader::close_on_drop;
use strata_bytes::{Reader, ReaderBase};

use crate::digester::Digester;

/// A [`Reader`] which feeds every byte read from `src` to a [`Digester`].
///
/// The window aliases the unread part of the window of `src`; bytes are
/// digested when the cursor is handed back to `src`. Skipping forward
/// digests the skipped bytes too, so the digest always covers exactly
/// `[initial pos, pos())`.
///
/// The window starts where the digest ends, so a seek back inside it only
/// revisits bytes not digested yet. Seeking before that point is refused
/// with `Unsupported`. A failed reader stops digesting.
pub struct DigestingReader<G, D>
where
    G: Digester,
    D: Dependency,
    D::Target: Reader,
{
    base: ReaderBase,
    digester: G,
    src: D,
}

impl<G, D> DigestingReader<G, D>
where
    G: Digester,
    D: Dependency,
    D::Target: Reader,
{
    pub fn new(digester: G, src: D) -> Self {
        let mut reader = Self {
            base: ReaderBase::new(),
            digester,
            src,
        };
        reader.make_buffer();
        reader
    }

    /// The digest of the data read so far.
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

    pub fn src(&self) -> &D {
        &self.src
    }

    fn sync_buffer(&mut self) {
        if !self.base.object().ok() {
            return;
        }
        let (start, cursor) = (self.base.start(), self.base.cursor());
        if cursor > start {
            self.digester.write(&self.src.get().buffer()[start..cursor]);
        }
        self.src.get_mut().set_cursor(cursor);
    }

    /// Starts a window at the cursor of `src`.
    fn make_buffer(&mut self) {
        let src = self.src.get();
        let src_base = src.base();
        let failure = src.status().cloned();
        self.base
            .set_buffer(src_base.cursor(), src_base.available(), 0);
        self.base.set_limit_pos(src_base.limit_pos());
        if let Some(status) = failure {
            self.fail_without_annotation(status);
        }
    }

    fn forward<T>(&self, result: Result<T>) -> Result<T> {
        result.map_err(|status| self.base.object().status().cloned().unwrap_or(status))
    }
}

impl<G, D> Reader for DigestingReader<G, D>
where
    G: Digester,
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
        let pos_before = self.src.get().pos();
        let result = self.src.get_mut().read(dest);
        let length_read = (self.src.get().pos() - pos_before) as usize;
        self.digester.write(&dest[..length_read]);
        self.make_buffer();
        self.forward(result)
    }

    fn size_impl(&mut self) -> Result<Position> {
        self.sync_buffer();
        let result = self.src.get_mut().size();
        self.make_buffer();
        self.forward(result)
    }

    fn size_support(&mut self) -> Support {
        self.src.get_mut().size_support()
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

impl<G, D> Drop for DigestingReader<G, D>
where
    G: Digester,
    D: Dependency,
    D::Target: Reader,
{
    fn drop(&mut self) {
        close_on_drop(self);
    }
}
