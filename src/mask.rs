/// XORs `buf` in place with the repeating 4 byte `mask`.
///
/// Masking and unmasking are the same operation.
#[inline]
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    let key = u32::from_ne_bytes(mask);

    let mut chunks = buf.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let word = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) ^ key;
        chunk.copy_from_slice(&word.to_ne_bytes());
    }

    // the remainder starts on a multiple of 4, so the key lines up again
    for (byte, key) in chunks.into_remainder().iter_mut().zip(mask) {
        *byte ^= key;
    }
}
