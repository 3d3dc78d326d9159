use strata_base::{
    Dependency, KeyedRecyclingPool, PoolStats, Recycled, RecyclingPool, Result, Status,
    DEFAULT_MAX_IDLE,
};
use strata_bytes::{BufferedReader, BufferedWriter, Reader, Writer};
use zstd::stream::raw::{Decoder, Encoder, Operation};
use zstd::zstd_safe::DParameter;

use crate::options::{ZstdReaderOptions, ZstdWriterOptions};
use crate::reader::{ZstdReader, ZstdSource};
use crate::writer::{ZstdSink, ZstdWriter};

/// A pooled compression context, keyed by compression level.
pub type PooledEncoder = Recycled<i32, Encoder<'static>>;
/// A pooled decompression context.
pub type PooledDecoder = Recycled<(), Decoder<'static>>;

/// Largest window a decoder accepts, as a power of two.
const WINDOW_LOG_MAX: u32 = if usize::BITS == 32 { 30 } else { 31 };

/// Recycles zstd codec contexts between streams.
///
/// Creating a context allocates several hundred kilobytes, so streams
/// created through the same `ZstdContexts` reuse the contexts of closed
/// streams. Cloning is cheap and shares the pools; pass one instance to
/// everything that should share them.
#[derive(Clone, Debug)]
pub struct ZstdContexts {
    encoders: KeyedRecyclingPool<i32, Encoder<'static>>,
    decoders: RecyclingPool<Decoder<'static>>,
}

impl ZstdContexts {
    /// Keeps up to `max_idle` idle decoders, and as many encoders for each
    /// compression level.
    pub fn new(max_idle: usize) -> Self {
        Self {
            encoders: KeyedRecyclingPool::new(max_idle),
            decoders: RecyclingPool::new(max_idle),
        }
    }

    /// Creates a fresh context for every stream and frees it on close.
    pub fn unpooled() -> Self {
        Self::new(0)
    }

    /// A compression context at `level`, with a fresh session.
    pub fn encoder(&self, level: i32) -> Result<PooledEncoder> {
        self.encoders
            .get(
                level,
                || Encoder::new(level).ok(),
                |encoder: &mut Encoder<'static>| encoder.reinit().is_ok(),
            )
            .ok_or_else(|| Status::internal("ZSTD_createCCtx() failed"))
    }

    /// A decompression context with a fresh session.
    pub fn decoder(&self) -> Result<PooledDecoder> {
        self.decoders
            .get(
                (),
                || {
                    let mut decoder = Decoder::new().ok()?;
                    decoder
                        .set_parameter(DParameter::WindowLogMax(WINDOW_LOG_MAX))
                        .ok()?;
                    Some(decoder)
                },
                |decoder: &mut Decoder<'static>| decoder.reinit().is_ok(),
            )
            .ok_or_else(|| Status::internal("ZSTD_createDCtx() failed"))
    }

    pub fn encoder_stats(&self) -> PoolStats {
        self.encoders.stats()
    }

    pub fn decoder_stats(&self) -> PoolStats {
        self.decoders.stats()
    }

    /// Compresses into `dest`.
    pub fn writer<D>(&self, dest: D, options: ZstdWriterOptions) -> ZstdWriter<D>
    where
        D: Dependency,
        D::Target: Writer,
    {
        BufferedWriter::new(ZstdSink::new(dest, options, self.clone()), options.buffer)
    }

    /// Decompresses one frame from `src`.
    pub fn reader<D>(&self, src: D, options: ZstdReaderOptions) -> ZstdReader<D>
    where
        D: Dependency,
        D::Target: Reader,
    {
        BufferedReader::new(ZstdSource::new(src, self.clone()), options.into())
    }
}

impl Default for ZstdContexts {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IDLE)
    }
}
