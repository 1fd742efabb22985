use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::hash::{Hash, Hasher};

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Multicodec tag carried by a content address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    DagPb,
    Raw,
    DagCbor,
    Other(u64),
}

impl Codec {
    pub fn code(&self) -> u64 {
        match self {
            Self::DagPb => 0x70,
            Self::Raw => 0x55,
            Self::DagCbor => 0x71,
            Self::Other(code) => *code,
        }
    }

    pub fn from_code(code: u64) -> Self {
        match code {
            0x70 => Self::DagPb,
            0x55 => Self::Raw,
            0x71 => Self::DagCbor,
            other => Self::Other(other),
        }
    }

    /// dag-pb nodes describe chained file data and are read whole through
    /// `cat`; every other codec is a single block.
    pub fn endpoint(&self) -> Endpoint {
        match self {
            Self::DagPb => Endpoint::Cat,
            _ => Endpoint::BlockGet,
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DagPb => write!(f, "dag-pb"),
            Self::Raw => write!(f, "raw"),
            Self::DagCbor => write!(f, "dag-cbor"),
            Self::Other(code) => write!(f, "0x{code:x}"),
        }
    }
}

impl std::str::FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dag-pb" => Ok(Self::DagPb),
            "raw" => Ok(Self::Raw),
            "dag-cbor" => Ok(Self::DagCbor),
            other => other
                .strip_prefix("0x")
                .and_then(|hex| u64::from_str_radix(hex, 16).ok())
                .map(Self::from_code)
                .ok_or_else(|| format!("invalid codec: {s}")),
        }
    }
}

/// Retrieval API variant used for an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Cat,
    BlockGet,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Self::Cat => "cat",
            Self::BlockGet => "block/get",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Cat => "CAT",
            Self::BlockGet => "BLOCK GET",
        }
    }
}

// ---------------------------------------------------------------------------
// Multihash
// ---------------------------------------------------------------------------

pub const SHA2_256: u64 = 0x12;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Multihash {
    pub code: u64,
    pub digest: Vec<u8>,
}

impl Multihash {
    pub fn new(code: u64, digest: Vec<u8>) -> Self {
        Self { code, digest }
    }

    pub fn sha2_256(data: &[u8]) -> Self {
        Self::new(SHA2_256, Sha256::digest(data).to_vec())
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, String> {
        let (code, used) = read_varint(bytes).ok_or("truncated multihash code")?;
        let rest = &bytes[used..];
        let (len, used) = read_varint(rest).ok_or("truncated multihash length")?;
        let digest = &rest[used..];
        if digest.len() as u64 != len {
            return Err(format!(
                "multihash declares {len} digest bytes, found {}",
                digest.len()
            ));
        }
        Ok(Self::new(code, digest.to_vec()))
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.digest.len() + 4);
        write_varint(self.code, &mut out);
        write_varint(self.digest.len() as u64, &mut out);
        out.extend_from_slice(&self.digest);
        out
    }

    fn is_v0_compatible(&self) -> bool {
        self.code == SHA2_256 && self.digest.len() == 32
    }
}

// ---------------------------------------------------------------------------
// ContentAddress
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CidVersion {
    V0,
    V1,
}

/// Identifier of one fetchable block.
///
/// Equality ignores the text version: a CIDv0 and the CIDv1 carrying the same
/// codec and multihash name the same block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentAddress {
    version: CidVersion,
    codec: Codec,
    hash: Multihash,
}

impl ContentAddress {
    /// Builds the shortest text form available: CIDv0 for dag-pb/sha2-256,
    /// CIDv1 otherwise.
    pub fn new(codec: Codec, hash: Multihash) -> Self {
        let version = if codec == Codec::DagPb && hash.is_v0_compatible() {
            CidVersion::V0
        } else {
            CidVersion::V1
        };
        Self {
            version,
            codec,
            hash,
        }
    }

    /// Builds an address from a hex-encoded multihash (`1220…`).
    pub fn from_multihash_hex(codec: Codec, multihash_hex: &str) -> Result<Self, String> {
        let bytes = hex::decode(multihash_hex).map_err(|e| format!("invalid hex: {e}"))?;
        Ok(Self::new(codec, Multihash::from_bytes(&bytes)?))
    }

    pub fn version(&self) -> CidVersion {
        self.version
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn multihash(&self) -> &Multihash {
        &self.hash
    }

    pub fn endpoint(&self) -> Endpoint {
        self.codec.endpoint()
    }

    /// Checks fetched bytes against the digest. `None` when the hash
    /// function is not one we can recompute.
    pub fn verify(&self, data: &[u8]) -> Option<bool> {
        if self.hash.code != SHA2_256 {
            return None;
        }
        Some(Sha256::digest(data).as_slice() == self.hash.digest.as_slice())
    }
}

impl PartialEq for ContentAddress {
    fn eq(&self, other: &Self) -> bool {
        self.codec == other.codec && self.hash == other.hash
    }
}

impl Eq for ContentAddress {}

impl Hash for ContentAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.codec.hash(state);
        self.hash.hash(state);
    }
}

impl fmt::Display for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            CidVersion::V0 => write!(f, "{}", bs58::encode(self.hash.to_bytes()).into_string()),
            CidVersion::V1 => {
                let mut bytes = Vec::new();
                write_varint(1, &mut bytes);
                write_varint(self.codec.code(), &mut bytes);
                bytes.extend_from_slice(&self.hash.to_bytes());
                write!(f, "z{}", bs58::encode(bytes).into_string())
            }
        }
    }
}

impl std::str::FromStr for ContentAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() == 46 && s.starts_with("Qm") {
            let bytes = bs58::decode(s)
                .into_vec()
                .map_err(|e| format!("invalid base58 in {s}: {e}"))?;
            let hash = Multihash::from_bytes(&bytes)?;
            if !hash.is_v0_compatible() {
                return Err(format!("CIDv0 must be sha2-256: {s}"));
            }
            return Ok(Self {
                version: CidVersion::V0,
                codec: Codec::DagPb,
                hash,
            });
        }

        let encoded = s
            .strip_prefix('z')
            .ok_or_else(|| format!("unsupported CID encoding: {s}"))?;
        let bytes = bs58::decode(encoded)
            .into_vec()
            .map_err(|e| format!("invalid base58 in {s}: {e}"))?;
        let (version, used) = read_varint(&bytes).ok_or("truncated CID version")?;
        if version != 1 {
            return Err(format!("unsupported CID version {version}: {s}"));
        }
        let rest = &bytes[used..];
        let (codec, used) = read_varint(rest).ok_or("truncated CID codec")?;
        let hash = Multihash::from_bytes(&rest[used..])?;
        Ok(Self {
            version: CidVersion::V1,
            codec: Codec::from_code(codec),
            hash,
        })
    }
}

impl TryFrom<String> for ContentAddress {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContentAddress> for String {
    fn from(value: ContentAddress) -> Self {
        value.to_string()
    }
}

// unsigned LEB128, as used by multiformats
fn read_varint(bytes: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    for (i, byte) in bytes.iter().enumerate().take(9) {
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

fn write_varint(mut value: u64, out: &mut Vec<u8>) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}
