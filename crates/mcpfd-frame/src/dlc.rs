//! Data-length code mapping.
//!
//! DLC 0-8 mean 0-8 bytes. CAN-FD reuses DLC 9-15 for 12, 16, 20, 24,
//! 32, 48 and 64 bytes; classic CAN treats them all as 8.

/// Maximum classic CAN payload.
pub const CAN_MAX_DLEN: usize = 8;

/// Maximum CAN-FD payload.
pub const CANFD_MAX_DLEN: usize = 64;

const DLC_LEN: [usize; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

/// Payload length of a DLC.
pub fn dlc_to_len(dlc: u8) -> usize {
    DLC_LEN[(dlc & 0x0f) as usize]
}

/// Smallest DLC whose payload holds `len` bytes.
///
/// Lengths above 64 map to DLC 15.
pub fn len_to_dlc(len: usize) -> u8 {
    DLC_LEN
        .iter()
        .position(|&max| len <= max)
        .unwrap_or(DLC_LEN.len() - 1) as u8
}

/// Whether `len` is exactly representable by a DLC.
pub fn is_valid_len(len: usize) -> bool {
    DLC_LEN.contains(&len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classic_lengths_map_directly() {
        for len in 0..=8 {
            assert_eq!(len_to_dlc(len) as usize, len);
            assert_eq!(dlc_to_len(len as u8), len);
        }
    }

    #[test]
    fn fd_lengths_round_up() {
        assert_eq!(len_to_dlc(9), 9);
        assert_eq!(len_to_dlc(12), 9);
        assert_eq!(len_to_dlc(13), 10);
        assert_eq!(len_to_dlc(33), 14);
        assert_eq!(len_to_dlc(64), 15);
        assert_eq!(len_to_dlc(100), 15);
        assert_eq!(dlc_to_len(14), 48);
    }

    #[test]
    fn valid_lengths() {
        assert!(is_valid_len(20));
        assert!(!is_valid_len(21));
    }
}
