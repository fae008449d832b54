//! Content addressing for uploaded manuals.

use sha2::{Digest, Sha256};

/// Document id for a file: the lowercase hex SHA-256 of its raw bytes.
pub fn generate_doc_id(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// True if `id` has the shape of a generated document id.
pub fn is_content_id(id: &str) -> bool {
    id.len() == 64 && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            generate_doc_id(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_empty_input_has_id() {
        let id = generate_doc_id(&[]);
        assert_eq!(
            id,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert!(is_content_id(&id));
    }

    #[test]
    fn test_deterministic() {
        let bytes = b"%PDF-1.7 grill manual".to_vec();
        assert_eq!(generate_doc_id(&bytes), generate_doc_id(&bytes.clone()));
    }

    #[test]
    fn test_single_byte_change_changes_id() {
        let original = b"%PDF-1.7 grill manual".to_vec();
        let mut changed = original.clone();
        changed[5] ^= 0x01;
        assert_ne!(generate_doc_id(&original), generate_doc_id(&changed));
    }

    #[test]
    fn test_shape_is_lowercase_hex() {
        let id = generate_doc_id(&[0xff; 4096]);
        assert_eq!(id.len(), 64);
        assert!(is_content_id(&id));
        assert!(!is_content_id(&id.to_uppercase()));
        assert!(!is_content_id("manual.pdf"));
    }
}
