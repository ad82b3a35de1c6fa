//! Page alignment and on-disk layout constants (§3, §6).

/// The unit of on-disk alignment for the header and chunk region.
pub const PAGE_SIZE: u64 = 4096;

/// Fixed overhead of one marshaled chunk record: 16 bytes extension-info,
/// 1 byte stuck flag, 2 bytes piece-set count (§4.4).
pub const CHUNK_FIXED_OVERHEAD: usize = 19;

/// Marshaled size of one piece record: 4-byte host offset, 4-byte piece
/// index, 32-byte Merkle root (§3, §6).
pub const PIECE_RECORD_SIZE: usize = 40;

/// Byte stride of one chunk slot on disk.
pub fn chunk_stride(pages_per_chunk: u32) -> u64 {
    pages_per_chunk as u64 * PAGE_SIZE
}

/// Absolute byte offset of chunk `index`, given the file's `chunk_offset`
/// and `pages_per_chunk`.
pub fn chunk_byte_offset(chunk_offset: u64, pages_per_chunk: u32, index: u64) -> u64 {
    chunk_offset + index * chunk_stride(pages_per_chunk)
}

/// Round `n` up to the next multiple of [`PAGE_SIZE`].
pub fn round_up_to_page(n: u64) -> u64 {
    let rem = n % PAGE_SIZE;
    if rem == 0 {
        n
    } else {
        n + (PAGE_SIZE - rem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_offsets_are_stride_spaced() {
        let stride = chunk_stride(2);
        assert_eq!(stride, 8192);
        assert_eq!(chunk_byte_offset(4096, 2, 0), 4096);
        assert_eq!(chunk_byte_offset(4096, 2, 1), 4096 + 8192);
        assert_eq!(chunk_byte_offset(4096, 2, 3), 4096 + 3 * 8192);
    }

    #[test]
    fn round_up_is_idempotent_on_multiples() {
        assert_eq!(round_up_to_page(4096), 4096);
        assert_eq!(round_up_to_page(4097), 8192);
        assert_eq!(round_up_to_page(0), 0);
    }

    proptest::proptest! {
        #[test]
        fn round_up_never_decreases_and_is_page_aligned(n in 0u64..10_000_000) {
            let rounded = round_up_to_page(n);
            proptest::prop_assert!(rounded >= n);
            proptest::prop_assert_eq!(rounded % PAGE_SIZE, 0);
            proptest::prop_assert!(rounded - n < PAGE_SIZE);
        }

        #[test]
        fn chunk_byte_offset_is_monotonic_in_index(
            chunk_offset in 0u64..1_000_000,
            pages_per_chunk in 1u32..16,
            index in 0u64..1000,
        ) {
            let a = chunk_byte_offset(chunk_offset, pages_per_chunk, index);
            let b = chunk_byte_offset(chunk_offset, pages_per_chunk, index + 1);
            proptest::prop_assert_eq!(b - a, chunk_stride(pages_per_chunk));
            proptest::prop_assert!(a >= chunk_offset);
        }
    }
}
