use std::{fmt, str::FromStr};

use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};

/// Length of an ABI encoded word.
pub const ABI_WORD_LEN: usize = 32;

/// 20-byte account identity used for controllers, the relayer, the owner and
/// the module's own holding account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub [u8; 20]);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid address hex: {0}")]
    InvalidHex(String),
    #[error("address must be 20 bytes, got {0}")]
    InvalidLength(usize),
    #[error("abi word must be 32 bytes, got {0}")]
    InvalidWordLength(usize),
    #[error("abi word has non-zero padding")]
    DirtyPadding,
}

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Builds a deterministic address from a small integer, handy for fixtures.
    pub fn from_low_u64(value: u64) -> Self {
        let mut bytes = [0u8; 20];
        bytes[12..].copy_from_slice(&value.to_be_bytes());
        Address(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, AddressError> {
        let raw: [u8; 20] = bytes
            .try_into()
            .map_err(|_| AddressError::InvalidLength(bytes.len()))?;
        Ok(Address(raw))
    }

    /// Decodes `abi.encode(address)`: twelve zero bytes followed by the
    /// twenty address bytes.
    pub fn from_abi_word(word: &[u8]) -> Result<Self, AddressError> {
        if word.len() != ABI_WORD_LEN {
            return Err(AddressError::InvalidWordLength(word.len()));
        }
        let (padding, body) = word.split_at(ABI_WORD_LEN - 20);
        if padding.iter().any(|b| *b != 0) {
            return Err(AddressError::DirtyPadding);
        }
        Self::from_slice(body)
    }

    pub fn to_abi_word(&self) -> [u8; ABI_WORD_LEN] {
        let mut word = [0u8; ABI_WORD_LEN];
        word[ABI_WORD_LEN - 20..].copy_from_slice(&self.0);
        word
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        let bytes = hex::decode(digits).map_err(|e| AddressError::InvalidHex(format!("{e}")))?;
        Self::from_slice(&bytes)
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        encoded.parse().map_err(D::Error::custom)
    }
}
