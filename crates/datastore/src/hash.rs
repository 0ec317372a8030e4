/// Stable fingerprint of raw payload bytes, as lowercase hex.
///
/// Only used for change detection between consecutive fetches of the same
/// unit, never as a security boundary.
pub fn fingerprint(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_deterministic() {
        assert_eq!(fingerprint(b"a,b\n1,2\n"), fingerprint(b"a,b\n1,2\n"));
        assert_ne!(fingerprint(b"a,b\n1,2\n"), fingerprint(b"a,b\n1,3\n"));
    }

    #[test]
    fn test_fingerprint_is_hex() {
        let hash = fingerprint(b"");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
