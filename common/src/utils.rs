//! Common Utilities
//!
//! Provides utility functions used across the sidelink UE implementation

/// Convert a byte slice to hex string for debugging
pub fn bytes_to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Saturating millisecond difference `a - b`, clamped at zero
pub fn elapsed_ms(a: u64, b: u64) -> u64 {
    a.saturating_sub(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_hex() {
        let data = vec![0x12, 0x34, 0xAB, 0xCD];
        assert_eq!(bytes_to_hex(&data), "12 34 ab cd");
    }

    #[test]
    fn test_elapsed_ms() {
        assert_eq!(elapsed_ms(10, 4), 6);
        assert_eq!(elapsed_ms(4, 10), 0);
    }
}
