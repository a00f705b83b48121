//! Wire representation of bit and word register values.

use byteorder::{BigEndian, ByteOrder};

/// Pack bits LSB first and prefix the result with its byte count
///
/// The bit of the first address lands in the least significant bit of the first byte. Unused
/// high bits of the last byte are zero.
pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let size = bits.len().div_ceil(8);
    let mut data = vec![0u8; 1 + size];
    data[0] = size as u8;
    for (i, _) in bits.iter().enumerate().filter(|(_, b)| **b) {
        data[1 + i / 8] |= 1 << (i % 8);
    }
    data
}

/// Unpack the first `count` bits of `packed`, LSB first
///
/// Bits beyond the end of `packed` read as zero.
pub fn unpack_bits(packed: &[u8], count: usize) -> Vec<bool> {
    (0..count)
        .map(|i| packed.get(i / 8).is_some_and(|b| (b >> (i % 8)) & 0x01 != 0))
        .collect()
}

/// Encode words big-endian and prefix the result with its byte count
pub fn encode_words(words: &[u16]) -> Vec<u8> {
    let mut data = vec![0u8; 1 + words.len() * 2];
    data[0] = (words.len() * 2) as u8;
    BigEndian::write_u16_into(words, &mut data[1..]);
    data
}

/// Decode big-endian words, a trailing odd byte is ignored
pub fn decode_words(bytes: &[u8]) -> Vec<u16> {
    bytes.chunks_exact(2).map(BigEndian::read_u16).collect()
}
