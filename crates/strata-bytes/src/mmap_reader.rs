use std::fs::File;
use std::path::Path;

use bytes::Bytes;
use memmap2::Mmap;
use strata_base::{Result, Status};
use tracing::debug;

use crate::memory::BytesReader;

/// Maps `file` into memory and reads it with a [`BytesReader`].
///
/// The whole file is one window, so reads never copy and forks made with
/// [`Reader::new_reader`](crate::Reader::new_reader) share the mapping.
///
/// The mapping reflects the file's length when it was mapped. Another
/// process truncating the file while it is mapped may raise `SIGBUS` on
/// access; map only files which are not modified concurrently.
pub fn map_file(file: &File) -> Result<BytesReader> {
    // SAFETY: the caller guarantees the file is not truncated while mapped.
    let mmap = unsafe { Mmap::map(file) }.map_err(|e| Status::from(e).annotate("mmap failed"))?;
    debug!(len = mmap.len(), "mapped file");
    Ok(BytesReader::new(Bytes::from_owner(mmap)))
}

/// Opens and maps `path`.
pub fn map_path(path: impl AsRef<Path>) -> Result<BytesReader> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| Status::from(e).annotate(format!("opening {}", path.display())))?;
    map_file(&file).map_err(|status| status.annotate(format!("reading {}", path.display())))
}
