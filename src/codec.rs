//! Fixed-width binary address encoding
//!
//! Every stored block and every lookup key is an IP address rendered as a
//! string of `'0'`/`'1'` characters, most significant bit first. Comparing
//! two such strings on a common leading substring is the same as comparing
//! the addresses on a common bit prefix, which is what the matcher relies on.

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => IpVersion::V4,
            IpAddr::V6(_) => IpVersion::V6,
        }
    }

    pub const fn bit_width(self) -> usize {
        match self {
            IpVersion::V4 => 32,
            IpVersion::V6 => 128,
        }
    }

    /// Bits per group in the native notation (octet or hextet)
    pub const fn group_width(self) -> usize {
        match self {
            IpVersion::V4 => 8,
            IpVersion::V6 => 16,
        }
    }

    /// Number of leading encoded characters used by the index-friendly
    /// prefilter. Derivable from a short prefix of the native notation:
    /// the first octet for V4, the first hextet plus three bits for V6.
    pub const fn prefilter_len(self) -> usize {
        match self {
            IpVersion::V4 => 8,
            IpVersion::V6 => 19,
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpVersion::V4 => write!(f, "IPv4"),
            IpVersion::V6 => write!(f, "IPv6"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("encoded {version} address must be {expected} characters, got {actual}")]
    Width {
        version: IpVersion,
        expected: usize,
        actual: usize,
    },
    #[error("encoded address may only contain '0' and '1', found {0:?}")]
    Digit(char),
    #[error("prefix length {prefix_len} is outside 0..={bits}")]
    PrefixLength { prefix_len: i64, bits: usize },
}

/// An address as a string of exactly `bit_width` binary digits
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EncodedAddress {
    version: IpVersion,
    bits: String,
}

impl EncodedAddress {
    /// Encode a parsed address group by group
    pub fn encode(addr: IpAddr) -> Self {
        let version = IpVersion::of(&addr);
        let width = version.group_width();
        let bits = match addr {
            IpAddr::V4(v4) => v4.octets().iter().map(|g| format!("{g:0width$b}")).collect(),
            IpAddr::V6(v6) => v6.segments().iter().map(|g| format!("{g:0width$b}")).collect(),
        };
        Self { version, bits }
    }

    /// Accept a pre-encoded key, checking only width and alphabet
    pub fn from_bits(version: IpVersion, bits: impl Into<String>) -> Result<Self, CodecError> {
        let bits = bits.into();
        if let Some(c) = bits.chars().find(|c| !matches!(c, '0' | '1')) {
            return Err(CodecError::Digit(c));
        }
        if bits.len() != version.bit_width() {
            return Err(CodecError::Width {
                version,
                expected: version.bit_width(),
                actual: bits.len(),
            });
        }
        Ok(Self { version, bits })
    }

    pub fn version(&self) -> IpVersion {
        self.version
    }

    pub fn as_str(&self) -> &str {
        &self.bits
    }

    /// Leading `len` characters, clamped to the full width
    pub fn truncate(&self, len: usize) -> &str {
        &self.bits[..len.min(self.bits.len())]
    }

    pub fn prefilter(&self) -> &str {
        self.truncate(self.version.prefilter_len())
    }
}

impl fmt::Display for EncodedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.bits)
    }
}

/// A CIDR block as it is keyed in storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CidrBlock {
    #[serde(serialize_with = "serialize_bits")]
    pub addr: EncodedAddress,
    pub prefix_len: u8,
    pub cidr: String,
}

fn serialize_bits<S: serde::Serializer>(addr: &EncodedAddress, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(addr.as_str())
}

impl CidrBlock {
    /// Build a block from a parsed network. Host bits are dropped from the
    /// key; the canonical text is taken from the truncated network.
    pub fn from_network(net: IpNet) -> Self {
        let net = net.trunc();
        Self {
            addr: EncodedAddress::encode(net.network()),
            prefix_len: net.prefix_len(),
            cidr: net.to_string(),
        }
    }

    /// Build a block from already-encoded parts, as loaded from a dataset
    pub fn from_parts(
        addr: EncodedAddress,
        prefix_len: u8,
        cidr: impl Into<String>,
    ) -> Result<Self, CodecError> {
        let bits = addr.version().bit_width();
        if usize::from(prefix_len) > bits {
            return Err(CodecError::PrefixLength {
                prefix_len: i64::from(prefix_len),
                bits,
            });
        }
        Ok(Self {
            addr,
            prefix_len,
            cidr: cidr.into(),
        })
    }

    pub fn version(&self) -> IpVersion {
        self.addr.version()
    }

    /// The fixed network bits of this block
    pub fn network_bits(&self) -> &str {
        self.addr.truncate(usize::from(self.prefix_len))
    }
}
