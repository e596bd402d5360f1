use constant_time_eq::constant_time_eq;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

const SCHEME: &str = "pbkdf2-sha256";
const HASH_LEN: usize = 32;

pub const DEFAULT_ROUNDS: u32 = 100_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PasswordError {
    #[error("password must not be empty")]
    Empty,

    #[error("stored password hash is malformed")]
    MalformedHash,
}

/// Salted PBKDF2-HMAC-SHA256, encoded as `pbkdf2-sha256$<rounds>$<salt>$<hash>`.
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    rounds: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(DEFAULT_ROUNDS)
    }
}

impl PasswordHasher {
    pub fn new(rounds: u32) -> Self {
        Self { rounds: rounds.max(1) }
    }

    pub fn hash(&self, password: &str) -> Result<String, PasswordError> {
        if password.is_empty() {
            return Err(PasswordError::Empty);
        }
        let salt = Uuid::new_v4();
        let derived = derive(password, salt.as_bytes(), self.rounds);
        Ok(format!("{}${}${}${}", SCHEME, self.rounds, hex::encode(salt.as_bytes()), hex::encode(derived)))
    }

    /// Checks `password` against an encoded hash. Rounds come from the hash,
    /// so hashes made with other settings still verify.
    pub fn verify(&self, password: &str, encoded: &str) -> Result<bool, PasswordError> {
        let mut parts = encoded.split('$');
        let (Some(SCHEME), Some(rounds), Some(salt), Some(expected), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(PasswordError::MalformedHash);
        };

        let rounds: u32 = rounds.parse().map_err(|_| PasswordError::MalformedHash)?;
        let salt = hex::decode(salt).map_err(|_| PasswordError::MalformedHash)?;
        let expected = hex::decode(expected).map_err(|_| PasswordError::MalformedHash)?;
        if rounds == 0 || expected.len() != HASH_LEN {
            return Err(PasswordError::MalformedHash);
        }

        let derived = derive(password, &salt, rounds);
        Ok(constant_time_eq(&derived, &expected))
    }
}

fn derive(password: &str, salt: &[u8], rounds: u32) -> [u8; HASH_LEN] {
    let mut out = [0u8; HASH_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, rounds, &mut out);
    out
}
