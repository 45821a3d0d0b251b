//! Embedding blob encoding.
//!
//! Vectors are stored as little-endian `f32` arrays in a BLOB column, with the
//! dimension kept alongside in `embedding_dim`.

/// Convert f32 slice to bytes for storage
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    bytes
}

/// Convert bytes back to f32 vector. Trailing bytes that do not form a whole
/// value are dropped.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
