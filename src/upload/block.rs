/// Reference block size: 1 MiB.
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

/// Block identifier for the given ordinal position: the zero-padded decimal
/// ordinal itself.
///
/// Every id of one upload has the same length and lexical order agrees with
/// numeric order, which is what lets the remote assemble blocks during
/// commit. Digits sort the same way in ASCII and in value; a base64 pass
/// over them would not (the standard alphabet puts 'z' before '0').
pub fn block_id(ordinal: usize) -> String {
    format!("{:08}", ordinal)
}

/// Split a buffer into fixed-size blocks; the last block may be short. A
/// buffer smaller than one block yields exactly one block.
pub fn partition(buffer: &[u8], block_size: usize) -> Vec<&[u8]> {
    assert!(block_size > 0, "block size must be non-zero");

    if buffer.len() <= block_size {
        return vec![buffer];
    }

    buffer.chunks(block_size).collect()
}
