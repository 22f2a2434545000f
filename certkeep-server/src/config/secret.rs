//! Token-signing secret

/// Size of a generated secret in bytes
pub const JWT_SECRET_SIZE: usize = 64;

/// Key material used to sign and verify authentication tokens
#[derive(Clone, PartialEq, Eq)]
pub struct JwtSecret {
    bytes: Vec<u8>,
}

impl JwtSecret {
    /// Create a new random secret from the OS RNG
    pub fn generate() -> Result<Self, getrandom::Error> {
        let mut bytes = vec![0u8; JWT_SECRET_SIZE];
        getrandom::fill(&mut bytes)?;
        Ok(Self { bytes })
    }

    /// Wrap existing key material. Callers are responsible for rejecting empty input.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for JwtSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JwtSecret(<{} bytes>)", self.bytes.len())
    }
}
