use strata_base::{Dependency, Position, Result, Status};
use strata_bytes::{BufferedWriter, FlushType, WriteBackend, Writer};
use tracing::debug;
use zstd::stream::raw::{Operation, OutBuffer};

use crate::contexts::{PooledEncoder, ZstdContexts};
use crate::options::ZstdWriterOptions;

/// Compresses into a [`Writer`] as one zstd frame.
pub type ZstdWriter<D> = BufferedWriter<ZstdSink<D>>;

/// [`WriteBackend`] compressing into `dest`, borrowed or owned.
///
/// The frame is completed on close. A flush emits everything compressed so
/// far as complete blocks, so a reader of `dest` can decompress all data
/// written before the flush.
pub struct ZstdSink<D>
where
    D: Dependency,
    D::Target: Writer,
{
    dest: D,
    /// `None` once the frame has been finished.
    encoder: Option<PooledEncoder>,
    pledged_size: Option<Position>,
    /// Uncompressed bytes handed to the encoder.
    written: Position,
    init_failure: Option<Status>,
}

impl<D> ZstdSink<D>
where
    D: Dependency,
    D::Target: Writer,
{
    pub fn new(dest: D, options: ZstdWriterOptions, contexts: ZstdContexts) -> Self {
        let mut sink = Self {
            dest,
            encoder: None,
            pledged_size: options.pledged_size,
            written: 0,
            init_failure: None,
        };
        if let Err(status) = sink.init_encoder(&options, &contexts) {
            sink.init_failure = Some(status);
        }
        sink
    }

    fn init_encoder(&mut self, options: &ZstdWriterOptions, contexts: &ZstdContexts) -> Result<()> {
        options.validate()?;
        let mut encoder = contexts.encoder(options.compression_level)?;
        encoder
            .set_pledged_src_size(options.pledged_size)
            .map_err(|err| {
                Status::internal(format!("ZSTD_CCtx_setPledgedSrcSize() failed: {err}"))
            })?;
        self.encoder = Some(encoder);
        Ok(())
    }

    pub fn dest(&self) -> &D {
        &self.dest
    }

    pub fn dest_mut(&mut self) -> &mut D {
        &mut self.dest
    }

    /// Moves compressor output into `dest` until `step` reports that
    /// nothing is left.
    fn drain_into_dest<F>(&mut self, mut step: F) -> Result<()>
    where
        F: FnMut(&mut PooledEncoder, &mut OutBuffer<'_, [u8]>) -> std::io::Result<usize>,
    {
        let Some(encoder) = self.encoder.as_mut() else {
            return Ok(());
        };
        let dest = self.dest.get_mut();
        loop {
            dest.push(1, 0)?;
            let (remaining, length) = {
                let mut output = OutBuffer::around(dest.chunk_mut());
                let remaining = step(encoder, &mut output).map_err(|err| {
                    Status::internal(format!("ZSTD_compressStream2() failed: {err}"))
                })?;
                (remaining, output.pos())
            };
            dest.move_cursor(length);
            if remaining == 0 {
                return Ok(());
            }
        }
    }

    fn check_pledged_size(&self) -> Result<()> {
        match self.pledged_size {
            Some(pledged) if pledged != self.written => Err(Status::failed_precondition(format!(
                "Actual size does not match pledged size: {} != {}",
                self.written, pledged
            ))),
            _ => Ok(()),
        }
    }
}

impl<D> WriteBackend for ZstdSink<D>
where
    D: Dependency,
    D::Target: Writer,
{
    fn write(&mut self, _pos: Position, src: &[u8]) -> Result<()> {
        let end = self.written + src.len() as Position;
        if let Some(pledged) = self.pledged_size {
            if end > pledged {
                return Err(Status::failed_precondition(format!(
                    "Actual size does not match pledged size: {end} > {pledged}"
                )));
            }
        }
        let Some(encoder) = self.encoder.as_mut() else {
            return Err(Status::failed_precondition("Zstd frame already finished"));
        };
        let dest = self.dest.get_mut();
        let mut consumed = 0;
        while consumed < src.len() {
            dest.push(1, src.len() - consumed)?;
            let progress = encoder
                .run_on_buffers(&src[consumed..], dest.chunk_mut())
                .map_err(|err| Status::internal(format!("ZSTD_compressStream2() failed: {err}")))?;
            dest.move_cursor(progress.bytes_written);
            consumed += progress.bytes_read;
        }
        self.written = end;
        Ok(())
    }

    fn initial_pos(&mut self) -> Result<Position> {
        match &self.init_failure {
            Some(status) => Err(status.clone()),
            None => Ok(0),
        }
    }

    fn flush(&mut self, flush_type: FlushType) -> Result<()> {
        self.drain_into_dest(|encoder, output| encoder.flush(output))?;
        if flush_type == FlushType::FromObject && !self.dest.is_owning() {
            return Ok(());
        }
        self.dest.get_mut().flush(flush_type)
    }

    fn close(&mut self) -> Result<()> {
        let finished = if self.encoder.is_some() && self.dest.get().ok() {
            self.check_pledged_size()
                .and_then(|()| self.drain_into_dest(|encoder, output| encoder.finish(output, false)))
        } else {
            Ok(())
        };
        if finished.is_ok() {
            debug!(uncompressed = self.written, "zstd frame finished");
        }
        // Returns the context to the pool.
        self.encoder = None;
        let closed = if self.dest.is_owning() {
            self.dest.get_mut().close()
        } else {
            Ok(())
        };
        finished.and(closed)
    }

    fn annotate_at(&self, status: Status, pos: Position) -> Status {
        status.annotate(format!("at uncompressed byte {pos}"))
    }
}
