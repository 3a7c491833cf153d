use serde::{Deserialize, Serialize};

/// Checksum algorithm, stored as a small integer code. Codes not known to
/// this build are carried through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChecksumKind {
    Adler32,
    Md5,
    Sha1,
    Sha256,
    Sha512,
    Other(i32),
}

impl ChecksumKind {
    pub fn to_int(self) -> i32 {
        match self {
            ChecksumKind::Adler32 => 1,
            ChecksumKind::Md5 => 2,
            ChecksumKind::Sha1 => 3,
            ChecksumKind::Sha256 => 4,
            ChecksumKind::Sha512 => 5,
            ChecksumKind::Other(v) => v,
        }
    }

    pub fn from_int(v: i32) -> Self {
        match v {
            1 => ChecksumKind::Adler32,
            2 => ChecksumKind::Md5,
            3 => ChecksumKind::Sha1,
            4 => ChecksumKind::Sha256,
            5 => ChecksumKind::Sha512,
            other => ChecksumKind::Other(other),
        }
    }
}

/// A content checksum of one algorithm, hex-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    pub kind: ChecksumKind,
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codec() {
        assert_eq!(ChecksumKind::from_int(2), ChecksumKind::Md5);
        assert_eq!(ChecksumKind::from_int(99), ChecksumKind::Other(99));
        assert_eq!(ChecksumKind::Other(99).to_int(), 99);
        assert_eq!(ChecksumKind::from_int(ChecksumKind::Sha256.to_int()), ChecksumKind::Sha256);
    }
}
