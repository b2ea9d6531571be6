//! One's-complement folding checksum for stream headers.
//!
//! The data-streaming setup verb carries a header protected by the standard
//! 16-bit one's-complement checksum: sum the buffer as big-endian 16-bit
//! words (padding an odd trailing byte with zero), fold carries back into
//! the low 16 bits, and complement the result. A buffer with a correct
//! checksum field sums to `0xFFFF` before complementing.

/// Compute the one's-complement checksum over `data`.
///
/// # Example
///
/// ```
/// use acqlib_wire::checksum::fold_checksum;
///
/// // Empty input checksums to the complement of zero.
/// assert_eq!(fold_checksum(&[]), 0xFFFF);
/// ```
pub fn fold_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += u16::from_be_bytes([*last, 0]) as u32;
    }

    // Fold carries until the sum fits in 16 bits.
    while sum > 0xFFFF {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}

/// Verify a buffer whose checksum field is included in `data`.
///
/// With the checksum field filled in, the folded sum of the whole buffer is
/// `0xFFFF`, so the complemented result is zero.
pub fn verify_checksum(data: &[u8]) -> bool {
    fold_checksum(data) == 0
}
