//! Random resource names

use rand::Rng;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Length of a generated name
pub const NAME_LEN: usize = 8;

/// Random DNS-1123 compatible name, e.g. "k3x9a0qz"
pub fn generate_name() -> String {
    let mut rng = rand::thread_rng();
    (0..NAME_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Random name under a prefix, e.g. "functional-test-k3x9a0qz"
pub fn generate_prefixed_name(prefix: &str) -> String {
    format!("{}-{}", prefix, generate_name())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_name_is_valid_label() {
        for _ in 0..50 {
            let name = generate_name();
            assert_eq!(name.len(), NAME_LEN);
            assert!(name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_prefixed_name() {
        let name = generate_prefixed_name("functional-test");
        assert!(name.starts_with("functional-test-"));
        assert_eq!(name.len(), "functional-test-".len() + NAME_LEN);
    }
}
