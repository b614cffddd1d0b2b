//! Part checksums
//!
//! B2 verifies every part and whole-file upload against a hex SHA-1 digest.
//! Digests are computed on the blocking pool so large parts do not stall the
//! runtime.

use super::UploadError;
use bytes::Bytes;
use sha1::{Digest, Sha1};
use tokio::task::JoinError;

/// Checksum value that tells B2 to skip verification
pub const DO_NOT_VERIFY: &str = "do_not_verify";

/// Hex SHA-1 of `data`
pub fn sha1_hex(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}

/// Compute the hex SHA-1 of a part off the async runtime
///
/// In development mode a failed digest is replaced by [`DO_NOT_VERIFY`] so
/// local testing against servers that skip verification keeps working.
pub async fn compute(data: Bytes, development: bool) -> Result<String, UploadError> {
    resolve(
        tokio::task::spawn_blocking(move || sha1_hex(&data)).await,
        development,
    )
}

fn resolve(result: Result<String, JoinError>, development: bool) -> Result<String, UploadError> {
    match result {
        Ok(digest) => Ok(digest),
        Err(e) if development => {
            tracing::warn!(error = %e, "Checksum creation failed, using placeholder");
            Ok(DO_NOT_VERIFY.to_string())
        }
        Err(e) => Err(UploadError::ChecksumCreation(e.to_string())),
    }
}
