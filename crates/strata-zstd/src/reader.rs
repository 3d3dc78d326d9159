use strata_base::{Dependency, Position, Result, Status, Support};
use strata_bytes::{BufferedReader, BufferedReaderOptions, Fill, ReadBackend, Reader};
use tracing::debug;
use zstd::stream::raw::Operation;

use crate::contexts::{PooledDecoder, ZstdContexts};
use crate::options::ZstdReaderOptions;

/// Decompresses one zstd frame from a [`Reader`].
pub type ZstdReader<D> = BufferedReader<ZstdSource<D>>;

/// Longest possible frame header.
const FRAME_HEADER_SIZE_MAX: usize = 18;

const ZSTD_MAGIC: u32 = 0xFD2F_B528;

/// Skippable frames use any magic number in `0x184D2A50..=0x184D2A5F`.
const SKIPPABLE_MAGIC_START: u32 = 0x184D_2A50;
const SKIPPABLE_MAGIC_MASK: u32 = 0xFFFF_FFF0;

/// Magic number and frame length of a skippable frame.
const SKIPPABLE_HEADER_SIZE: usize = 8;

/// [`ReadBackend`] decompressing from `src`, borrowed or owned.
///
/// The uncompressed size is known up front when the frame header records
/// it; a skippable frame has size 0. If the header is still incomplete at
/// construction, as with a growing source, it is parsed again before the
/// first byte is decompressed. Rewinding re-reads `src` from where the
/// frame started, so it needs `src` to support rewinding; forward seeks
/// decompress and discard.
pub struct ZstdSource<D>
where
    D: Dependency,
    D::Target: Reader,
{
    src: D,
    contexts: ZstdContexts,
    /// `None` once the frame has been fully decompressed.
    decoder: Option<PooledDecoder>,
    initial_compressed_pos: Position,
    frame_size: Option<Position>,
    init_failure: Option<Status>,
}

impl<D> ZstdSource<D>
where
    D: Dependency,
    D::Target: Reader,
{
    pub fn new(mut src: D, contexts: ZstdContexts) -> Self {
        let initial_compressed_pos = src.get().pos();
        let mut init_failure = None;
        let mut frame_size = None;
        match read_frame_header(src.get_mut()) {
            Ok(FrameHeader::Complete(size)) => frame_size = size,
            Ok(FrameHeader::Incomplete | FrameHeader::Invalid) => {}
            Err(status) => init_failure = Some(status),
        }
        let decoder = match contexts.decoder() {
            Ok(decoder) => Some(decoder),
            Err(status) => {
                init_failure.get_or_insert(status);
                None
            }
        };
        Self {
            src,
            contexts,
            decoder,
            initial_compressed_pos,
            frame_size,
            init_failure,
        }
    }

    pub fn src(&self) -> &D {
        &self.src
    }

    pub fn src_mut(&mut self) -> &mut D {
        &mut self.src
    }

    /// The uncompressed size recorded in the frame header, if any.
    pub fn frame_size(&self) -> Option<Position> {
        self.frame_size
    }

    /// Whether nothing of the frame has been handed to the decoder yet.
    fn at_frame_start(&self) -> bool {
        self.decoder.is_some() && self.src.get().pos() == self.initial_compressed_pos
    }

    /// Parses the header again if the size is unknown and the frame has not
    /// been started, in case `src` has grown since.
    fn refresh_frame_size(&mut self) -> Result<FrameHeader> {
        if self.frame_size.is_some() || !self.at_frame_start() {
            return Ok(FrameHeader::Complete(self.frame_size));
        }
        let header = read_frame_header(self.src.get_mut())?;
        if let FrameHeader::Complete(Some(size)) = header {
            debug!(size, "zstd frame size known after growing");
            self.frame_size = Some(size);
        }
        Ok(header)
    }
}

enum FrameHeader {
    /// The uncompressed size, if the header records it.
    Complete(Option<Position>),
    /// `src` ends inside what may be a frame header.
    Incomplete,
    /// Not a frame header; the decoder reports the details.
    Invalid,
}

/// Parses the frame header at the cursor of `src` without consuming it.
fn read_frame_header<R: Reader + ?Sized>(src: &mut R) -> Result<FrameHeader> {
    src.pull(FRAME_HEADER_SIZE_MAX, FRAME_HEADER_SIZE_MAX)?;
    let header = src.chunk();
    let Some(magic) = header.first_chunk::<4>().map(|bytes| u32::from_le_bytes(*bytes)) else {
        return Ok(FrameHeader::Incomplete);
    };
    if magic & SKIPPABLE_MAGIC_MASK == SKIPPABLE_MAGIC_START {
        return Ok(if header.len() >= SKIPPABLE_HEADER_SIZE {
            FrameHeader::Complete(Some(0))
        } else {
            FrameHeader::Incomplete
        });
    }
    match zstd::zstd_safe::get_frame_content_size(header) {
        Ok(size) => Ok(FrameHeader::Complete(size)),
        Err(_) if magic == ZSTD_MAGIC && header.len() < FRAME_HEADER_SIZE_MAX => {
            Ok(FrameHeader::Incomplete)
        }
        Err(_) => Ok(FrameHeader::Invalid),
    }
}

impl<D> ReadBackend for ZstdSource<D>
where
    D: Dependency,
    D::Target: Reader,
{
    fn fill(&mut self, _pos: Position, dest: &mut [u8], min_length: usize) -> Result<Fill> {
        if let FrameHeader::Incomplete = self.refresh_frame_size()? {
            return Ok(Fill::Truncated);
        }
        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(Fill::End);
        };
        let src = self.src.get_mut();
        let mut written = 0;
        loop {
            let progress = match decoder.run_on_buffers(src.chunk(), &mut dest[written..]) {
                Ok(progress) => progress,
                Err(err) => {
                    let status = Status::data_loss(format!("ZSTD_decompressStream() failed: {err}"));
                    return Err(src.annotate(status));
                }
            };
            src.move_cursor(progress.bytes_read);
            written += progress.bytes_written;
            if progress.remaining == 0 {
                debug!(
                    compressed = src.pos() - self.initial_compressed_pos,
                    "zstd frame complete"
                );
                // Returns the context to the pool.
                self.decoder = None;
                return Ok(if written > 0 { Fill::Data(written) } else { Fill::End });
            }
            if written >= min_length || written == dest.len() {
                return Ok(Fill::Data(written));
            }
            if src.available() == 0 && !src.pull(1, progress.remaining)? {
                return Ok(if written > 0 {
                    Fill::Data(written)
                } else {
                    Fill::Truncated
                });
            }
        }
    }

    fn initial_pos(&mut self) -> Result<Position> {
        match &self.init_failure {
            Some(status) => Err(status.clone()),
            None => Ok(0),
        }
    }

    fn random_access_support(&mut self) -> Support {
        Err(Status::unsupported(
            "Zstd-compressed stream does not support random access",
        ))
    }

    fn rewind_support(&mut self) -> Support {
        self.src.get_mut().rewind_support()
    }

    fn size_support(&mut self) -> Support {
        self.refresh_frame_size()?;
        match self.frame_size {
            Some(_) => Ok(()),
            None => Err(Status::unsupported(
                "Uncompressed size was not stored in the Zstd-compressed stream",
            )),
        }
    }

    fn new_reader_support(&mut self) -> Support {
        self.src.get_mut().new_reader_support()
    }

    /// Restarts decompression from the beginning of the frame.
    fn seek_behind_buffer(&mut self, _new_pos: Position) -> Result<Position> {
        let src = self.src.get_mut();
        if !src.seek(self.initial_compressed_pos)? {
            let status = Status::data_loss("Zstd-compressed stream got truncated");
            return Err(src.annotate(status));
        }
        self.decoder = None;
        self.decoder = Some(self.contexts.decoder()?);
        Ok(0)
    }

    fn size(&mut self) -> Result<Position> {
        self.size_support()?;
        Ok(self.frame_size.unwrap_or_default())
    }

    fn known_size(&mut self) -> Option<Position> {
        self.frame_size
    }

    fn new_reader(
        &mut self,
        initial_pos: Position,
        options: &BufferedReaderOptions,
    ) -> Result<Box<dyn Reader + Send>> {
        let src = self.src.get_mut().new_reader(self.initial_compressed_pos)?;
        let options = ZstdReaderOptions {
            growing_source: options.growing_source,
            buffer: options.buffer,
        };
        let mut reader = self.contexts.reader(src, options);
        reader.seek(initial_pos)?;
        Ok(Box::new(reader))
    }

    fn truncated_status(&self) -> Status {
        Status::data_loss("Truncated Zstd-compressed stream")
    }

    fn close(&mut self) -> Result<()> {
        self.decoder = None;
        if self.src.is_owning() {
            self.src.get_mut().close()?;
        }
        Ok(())
    }

    fn annotate_at(&self, status: Status, pos: Position) -> Status {
        status.annotate(format!("at uncompressed byte {pos}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ZstdWriterOptions;
    use strata_base::{ErrorKind, Owned};
    use strata_bytes::{
        BufferOptions, BytesReader, FileReader, LimitingReader, LimitingReaderOptions,
        SliceReader, VecWriter, Writer,
    };

    /// Source whose visible length can be raised while it is being read.
    struct GrowingSource {
        data: Vec<u8>,
        visible: usize,
    }

    impl ReadBackend for GrowingSource {
        fn fill(&mut self, pos: Position, dest: &mut [u8], _min_length: usize) -> Result<Fill> {
            let pos = pos as usize;
            if pos >= self.visible {
                return Ok(Fill::End);
            }
            let length = dest.len().min(self.visible - pos);
            dest[..length].copy_from_slice(&self.data[pos..pos + length]);
            Ok(Fill::Data(length))
        }
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| ((i / 7) % 251) as u8).collect()
    }

    fn compress(data: &[u8], pledged: bool) -> Vec<u8> {
        let mut out = Vec::new();
        let options = ZstdWriterOptions {
            pledged_size: pledged.then_some(data.len() as Position),
            ..Default::default()
        };
        let mut writer = ZstdContexts::default().writer(Owned(VecWriter::new(&mut out)), options);
        writer.write(data).unwrap();
        writer.close().unwrap();
        drop(writer);
        out
    }

    #[test]
    fn decompresses_what_was_compressed() {
        let data = pattern(300_000);
        let compressed = compress(&data, false);
        assert!(compressed.len() < data.len() / 10);

        let contexts = ZstdContexts::default();
        let mut reader = contexts.reader(Owned(SliceReader::new(&compressed)), ZstdReaderOptions::default());
        let mut out = Vec::new();
        assert!(!reader.read_to_vec(400_000, &mut out).unwrap());
        assert_eq!(out, data);
        reader.verify_end().unwrap();
        reader.close().unwrap();
    }

    #[test]
    fn pledged_size_is_known_up_front() {
        let data = pattern(50_000);
        let compressed = compress(&data, true);
        let contexts = ZstdContexts::default();
        let mut reader = contexts.reader(Owned(SliceReader::new(&compressed)), ZstdReaderOptions::default());
        assert_eq!(reader.backend().frame_size(), Some(50_000));
        assert_eq!(reader.size().unwrap(), 50_000);
        let mut out = Vec::new();
        assert!(reader.read_to_vec(50_000, &mut out).unwrap());
        assert_eq!(out, data);
        assert!(!reader.pull(1, 0).unwrap());
    }

    #[test]
    fn rewind_restarts_from_the_frame() {
        let data = pattern(100_000);
        let compressed = compress(&data, true);
        let mut src = SliceReader::new(&compressed);
        let mut reader = ZstdContexts::default().reader(&mut src, ZstdReaderOptions::default());
        assert!(reader.seek(90_000).unwrap());
        assert_eq!(reader.read_byte().unwrap(), Some(data[90_000]));
        assert!(reader.seek(5).unwrap());
        assert_eq!(reader.read_byte().unwrap(), Some(data[5]));
        assert!(!reader.seek(200_000).unwrap());
        assert_eq!(reader.pos(), 100_000);
        reader.close().unwrap();
    }

    #[test]
    fn frame_after_a_prefix() {
        let data = pattern(1_000);
        let mut framed = b"header".to_vec();
        framed.extend_from_slice(&compress(&data, true));
        let mut src = SliceReader::new(&framed);
        assert!(src.skip(6).unwrap());
        let mut reader = ZstdContexts::default().reader(&mut src, ZstdReaderOptions::default());
        assert!(reader.seek(500).unwrap());
        assert!(reader.seek(0).unwrap());
        let mut out = Vec::new();
        reader.read_to_vec(1_000, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn truncated_frame_is_data_loss() {
        let data = pattern(100_000);
        let compressed = compress(&data, false);
        let cut = &compressed[..compressed.len() / 2];
        let mut reader =
            ZstdContexts::default().reader(Owned(SliceReader::new(cut)), ZstdReaderOptions::default());
        let mut out = Vec::new();
        let err = reader.read_to_vec(100_000, &mut out).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataLoss);
        assert!(err.to_string().contains("Truncated Zstd-compressed stream"), "{err}");
        assert!(err.to_string().contains("at uncompressed byte"), "{err}");
        assert!(reader.close().is_err());
    }

    #[test]
    fn growing_source_defers_truncation_to_close() {
        let data = pattern(100_000);
        let compressed = compress(&data, false);
        let cut = &compressed[..compressed.len() / 2];
        let options = ZstdReaderOptions {
            growing_source: true,
            ..Default::default()
        };
        let mut reader = ZstdContexts::default().reader(Owned(SliceReader::new(cut)), options);
        let mut out = Vec::new();
        assert!(!reader.read_to_vec(100_000, &mut out).unwrap());
        assert!(reader.ok());
        assert!(reader.truncated());
        assert_eq!(out, &data[..out.len()]);
        let err = reader.close().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataLoss);
    }

    #[test]
    fn skippable_frame_has_size_zero() {
        let mut frame = SKIPPABLE_MAGIC_START.to_le_bytes().to_vec();
        frame.extend_from_slice(&5u32.to_le_bytes());
        frame.extend_from_slice(b"notes");
        let mut reader = ZstdContexts::default()
            .reader(Owned(SliceReader::new(&frame)), ZstdReaderOptions::default());
        assert_eq!(reader.backend().frame_size(), Some(0));
        assert!(reader.supports_size());
        assert_eq!(reader.size().unwrap(), 0);
        assert!(!reader.pull(1, 0).unwrap());
        reader.verify_end().unwrap();
        reader.close().unwrap();
    }

    #[test]
    fn size_is_learned_once_a_growing_header_completes() {
        let data = pattern(30_000);
        let compressed = compress(&data, true);
        let growing = BufferedReaderOptions {
            growing_source: true,
            ..Default::default()
        };
        let src = BufferedReader::new(
            GrowingSource {
                data: compressed.clone(),
                visible: 3,
            },
            growing,
        );
        let options = ZstdReaderOptions {
            growing_source: true,
            ..Default::default()
        };
        let mut reader = ZstdContexts::default().reader(Owned(src), options);
        assert_eq!(reader.backend().frame_size(), None);
        assert!(!reader.pull(1, 0).unwrap());
        assert!(reader.ok());
        assert!(reader.truncated());
        assert_eq!(reader.backend().frame_size(), None);

        reader.backend_mut().src_mut().get_mut().backend_mut().visible = compressed.len();
        assert_eq!(reader.read_byte().unwrap(), Some(data[0]));
        assert_eq!(reader.backend().frame_size(), Some(30_000));
        assert_eq!(reader.size().unwrap(), 30_000);
        let mut rest = Vec::new();
        assert!(!reader.read_to_vec(30_000, &mut rest).unwrap());
        assert_eq!(rest, &data[1..]);
        reader.close().unwrap();
    }

    #[test]
    fn corrupt_data_fails() {
        let mut compressed = compress(&pattern(10_000), false);
        // Damages the magic number.
        compressed[0] ^= 0xff;
        let mut reader = ZstdContexts::default()
            .reader(Owned(SliceReader::new(&compressed)), ZstdReaderOptions::default());
        let mut out = Vec::new();
        let err = reader.read_to_vec(10_000, &mut out).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataLoss);
        assert!(!reader.ok());
    }

    #[test]
    fn forks_decompress_independently() {
        let data = pattern(70_000);
        let compressed = bytes::Bytes::from(compress(&data, true));
        let mut reader = ZstdContexts::default()
            .reader(Owned(BytesReader::new(compressed)), ZstdReaderOptions::default());
        assert!(reader.supports_new_reader());
        let mut fork = reader.new_reader(60_000).unwrap();
        let handle = std::thread::spawn(move || {
            let mut out = Vec::new();
            fork.read_to_vec(10_000, &mut out).unwrap();
            out
        });
        let mut head = Vec::new();
        reader.read_to_vec(10, &mut head).unwrap();
        assert_eq!(head, &data[..10]);
        assert_eq!(handle.join().unwrap(), &data[60_000..]);
    }

    #[test]
    fn reads_through_a_limit_and_a_file() {
        use std::io::Write;
        let data = pattern(40_000);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let compressed = compress(&data, false);
        file.write_all(&compressed).unwrap();
        file.write_all(b"trailing garbage").unwrap();
        file.flush().unwrap();

        let src = FileReader::open(file.path(), Default::default()).unwrap();
        let limited = LimitingReader::new(
            Owned(src),
            LimitingReaderOptions {
                max_length: Some(compressed.len() as Position),
                exact: true,
                ..Default::default()
            },
        );
        let options = ZstdReaderOptions {
            buffer: BufferOptions::with_buffer_size(1000),
            ..Default::default()
        };
        let mut reader = ZstdContexts::default().reader(Owned(limited), options);
        let mut out = Vec::new();
        assert!(!reader.read_to_vec(50_000, &mut out).unwrap());
        assert_eq!(out, data);
        reader.close().unwrap();
    }
}
