//! Integrity hasher
//!
//! SHA-1 is the checksum Box reports for each file version, so local content
//! is hashed with the same algorithm and compared as lowercase hex.

use std::path::Path;

use imctransfer_core::domain::ContentHash;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Bytes read per chunk while hashing
pub const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Hash everything `reader` yields until end of stream
///
/// Reads in [`HASH_CHUNK_SIZE`] chunks; memory use does not grow with input
/// size.
pub async fn digest_reader<R>(reader: &mut R) -> std::io::Result<ContentHash>
where
    R: AsyncRead + Unpin,
{
    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    let hex = hex::encode(hasher.finalize());
    ContentHash::new(hex).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Hash the file at `path`
pub async fn digest_file(path: &Path) -> std::io::Result<ContentHash> {
    let mut file = tokio::fs::File::open(path).await?;
    digest_reader(&mut file).await
}
