//! Chunk sources for the send loops: random bytes or a file's contents.

use std::io::ErrorKind;
use std::path::Path;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::error::SpeedError;

/// Where a worker's bytes come from.
pub enum Payload {
    /// Fresh random bytes for every chunk.
    Random(StdRng),
    /// Sequential reads from a source file; ends at EOF.
    File(File),
}

impl Payload {
    /// Open the payload source. A missing file is reported as
    /// [`SpeedError::SourceFileNotFound`].
    pub async fn open(source: Option<&Path>) -> Result<Self, SpeedError> {
        let Some(path) = source else {
            return Ok(Self::Random(StdRng::from_entropy()));
        };
        match File::open(path).await {
            Ok(file) => Ok(Self::File(file)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(SpeedError::SourceFileNotFound {
                path: path.to_path_buf(),
            }),
            Err(e) => Err(SpeedError::Io(e)),
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Self::File(_))
    }

    /// Fill `buf` with up to `len` bytes and return how many were produced.
    ///
    /// Random sources always produce `len`. File sources produce fewer only
    /// at end of file, and `0` once the file is exhausted.
    pub async fn fill(&mut self, buf: &mut Vec<u8>, len: usize) -> std::io::Result<usize> {
        buf.resize(len, 0);
        match self {
            Self::Random(rng) => {
                rng.fill_bytes(&mut buf[..len]);
                Ok(len)
            }
            Self::File(file) => {
                let mut filled = 0;
                while filled < len {
                    let n = file.read(&mut buf[filled..len]).await?;
                    if n == 0 {
                        break;
                    }
                    filled += n;
                }
                buf.truncate(filled);
                Ok(filled)
            }
        }
    }
}
