use bcrypt::{hash, verify, BcryptError, DEFAULT_COST};

const BCRYPT_PREFIXES: [&str; 4] = ["$2a$", "$2b$", "$2x$", "$2y$"];
const BCRYPT_HASH_LEN: usize = 60;

pub fn is_hashed(value: &str) -> bool {
    value.len() == BCRYPT_HASH_LEN && BCRYPT_PREFIXES.iter().any(|p| value.starts_with(p))
}

/// Hashes a plaintext password. Values that already are bcrypt hashes are
/// returned unchanged, so hashing twice never invalidates the stored hash.
pub fn hash_password(value: &str) -> Result<String, BcryptError> {
    hash_password_with_cost(value, DEFAULT_COST)
}

pub fn hash_password_with_cost(value: &str, cost: u32) -> Result<String, BcryptError> {
    if is_hashed(value) {
        return Ok(value.to_string());
    }
    hash(value, cost)
}

pub fn verify_password(plaintext: &str, stored_hash: &str) -> bool {
    verify(plaintext, stored_hash).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    // minimum cost keeps the tests fast
    const TEST_COST: u32 = 4;

    #[test]
    fn plaintext_is_hashed_and_verifiable() {
        let hashed = hash_password_with_cost("s3cret!", TEST_COST).unwrap();
        assert_ne!(hashed, "s3cret!");
        assert!(is_hashed(&hashed));
        assert!(verify_password("s3cret!", &hashed));
        assert!(!verify_password("wrong", &hashed));
    }

    #[test]
    fn hashing_twice_keeps_the_hash() {
        let once = hash_password_with_cost("s3cret!", TEST_COST).unwrap();
        let twice = hash_password_with_cost(&once, TEST_COST).unwrap();
        assert_eq!(once, twice);
        assert!(verify_password("s3cret!", &twice));
    }

    #[test]
    fn hash_like_prefix_alone_is_not_a_hash() {
        assert!(!is_hashed("$2b$short"));
        assert!(!is_hashed("pbkdf2_sha256$260000$abc"));
    }
}
