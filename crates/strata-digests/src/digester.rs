use strata_base::Position;

/// Accumulates a digest of the bytes fed to it.
///
/// Digesting decorators call [`Digester::write`] with exactly the bytes that
/// pass through them, in order. [`Digester::digest`] does not consume the
/// state, so a digest may be taken mid-stream and writing may continue.
pub trait Digester {
    type Digest: Clone + std::fmt::Debug + PartialEq;

    fn write(&mut self, src: &[u8]);

    /// Feeds `length` zero bytes.
    fn write_zeros(&mut self, mut length: Position) {
        const ZEROS: [u8; 4096] = [0; 4096];
        while length > 0 {
            let chunk = length.min(ZEROS.len() as Position) as usize;
            self.write(&ZEROS[..chunk]);
            length -= chunk as Position;
        }
    }

    fn digest(&self) -> Self::Digest;

    /// Forgets everything written so far.
    fn reset(&mut self);
}

impl<G: Digester + ?Sized> Digester for Box<G> {
    type Digest = G::Digest;

    fn write(&mut self, src: &[u8]) {
        (**self).write(src);
    }

    fn write_zeros(&mut self, length: Position) {
        (**self).write_zeros(length);
    }

    fn digest(&self) -> G::Digest {
        (**self).digest()
    }

    fn reset(&mut self) {
        (**self).reset();
    }
}
