/*
 * SHA-256 helpers used to verify that a cross-device move produced an
 * identical copy before the source is deleted.
 */
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/*
 * Calculates the SHA-256 checksum of a file as a hex string. The file is read
 * in chunks; a path that is not a regular file is an `InvalidInput` error.
 */
pub fn calculate_sha256_checksum(file_path: &Path) -> io::Result<String> {
    if !file_path.is_file() {
        let err_msg = format!("Path {file_path:?} is not a file, cannot calculate checksum.");
        log::warn!("ChecksumUtils: {err_msg}");
        return Err(io::Error::new(io::ErrorKind::InvalidInput, err_msg));
    }

    let file = File::open(file_path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0; 1024 * 64];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    let hex_checksum = format!("{:x}", hasher.finalize());
    log::trace!("ChecksumUtils: Calculated checksum {hex_checksum} for {file_path:?}");
    Ok(hex_checksum)
}

// True when both files exist and have identical content.
pub fn files_identical(left: &Path, right: &Path) -> io::Result<bool> {
    if left.metadata()?.len() != right.metadata()?.len() {
        return Ok(false);
    }
    Ok(calculate_sha256_checksum(left)? == calculate_sha256_checksum(right)?)
}
