use rand::RngCore;

/// Generate `len` random bytes and hex-encode them. Used for both the
/// slave's one-shot callback key and its workspace directory suffix, so the
/// two share one source of randomness rather than growing ad-hoc helpers.
pub fn hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_has_expected_length() {
        assert_eq!(hex(6).len(), 12);
        assert_eq!(hex(32).len(), 64);
    }

    #[test]
    fn hex_is_actually_hex() {
        let s = hex(16);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
