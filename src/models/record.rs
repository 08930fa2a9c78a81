use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

use crate::codec::{CidrBlock, CodecError, EncodedAddress, IpVersion};

/// Attribute kind; each kind lives in its own pair of tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Country,
    Asn,
    City,
}

impl Kind {
    pub const ALL: [Kind; 3] = [Kind::Country, Kind::Asn, Kind::City];

    /// Table descriptor for this kind in the given address family
    pub const fn table(self, version: IpVersion) -> Table {
        let name = match (self, version) {
            (Kind::Country, IpVersion::V4) => "ipaddr_v4",
            (Kind::Country, IpVersion::V6) => "ipaddr_v6",
            (Kind::Asn, IpVersion::V4) => "asn_v4",
            (Kind::Asn, IpVersion::V6) => "asn_v6",
            (Kind::City, IpVersion::V4) => "city_v4",
            (Kind::City, IpVersion::V6) => "city_v6",
        };
        Table {
            name,
            kind: self,
            version,
        }
    }

    /// Attribute columns in bind order
    pub const fn attr_columns(self) -> &'static [&'static str] {
        match self {
            Kind::Country => &["country"],
            Kind::Asn => &["asn", "provider"],
            Kind::City => &["city"],
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Country => write!(f, "country"),
            Kind::Asn => write!(f, "asn"),
            Kind::City => write!(f, "city"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Table {
    pub name: &'static str,
    pub kind: Kind,
    pub version: IpVersion,
}

/// Kind-specific payload of one stored row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Attributes {
    Country { country: String },
    Asn { asn: i64, provider: String },
    City { city: String },
}

impl Attributes {
    pub fn kind(&self) -> Kind {
        match self {
            Attributes::Country { .. } => Kind::Country,
            Attributes::Asn { .. } => Kind::Asn,
            Attributes::City { .. } => Kind::City,
        }
    }
}

/// One row of a kind-table: a block plus its attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KindRow {
    #[serde(flatten)]
    pub block: CidrBlock,
    #[serde(flatten)]
    pub attrs: Attributes,
}

impl KindRow {
    pub fn new(block: CidrBlock, attrs: Attributes) -> Self {
        Self { block, attrs }
    }

    pub fn kind(&self) -> Kind {
        self.attrs.kind()
    }

    pub fn version(&self) -> IpVersion {
        self.block.version()
    }

    pub fn table(&self) -> Table {
        self.kind().table(self.version())
    }
}

/// Attributes of all three kinds for one block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoAttributes {
    pub country: String,
    pub asn: i64,
    pub provider: String,
    pub city: String,
}

/// A block with all three kinds of attributes, written as a unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoRow {
    pub block: CidrBlock,
    pub attrs: GeoAttributes,
}

impl GeoRow {
    pub fn new(block: CidrBlock, attrs: GeoAttributes) -> Self {
        Self { block, attrs }
    }

    pub fn version(&self) -> IpVersion {
        self.block.version()
    }

    /// The three kind-rows this composite is stored as, in `Kind::ALL` order
    pub fn rows(&self) -> [KindRow; 3] {
        let attrs = &self.attrs;
        [
            KindRow::new(
                self.block.clone(),
                Attributes::Country {
                    country: attrs.country.clone(),
                },
            ),
            KindRow::new(
                self.block.clone(),
                Attributes::Asn {
                    asn: attrs.asn,
                    provider: attrs.provider.clone(),
                },
            ),
            KindRow::new(
                self.block.clone(),
                Attributes::City {
                    city: attrs.city.clone(),
                },
            ),
        ]
    }

    pub fn to_record(&self) -> GeoRecord {
        GeoRecord {
            cidr: self.block.cidr.clone(),
            country: self.attrs.country.clone(),
            asn: self.attrs.asn,
            provider: self.attrs.provider.clone(),
            city: Some(self.attrs.city.clone()),
        }
    }
}

/// The externally visible composite view of an address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoRecord {
    pub cidr: String,
    pub country: String,
    pub asn: i64,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

impl GeoRecord {
    /// Combine independently matched kind-rows into one record.
    ///
    /// The rows need not share a block; each only has to contain the
    /// queried address. Country and ASN are mandatory, city only when
    /// `require_city` is set. The country row's CIDR is the identity.
    pub fn combine(rows: &[KindRow], require_city: bool) -> Option<Self> {
        let mut country = None;
        let mut asn = None;
        let mut city = None;

        for row in rows {
            match &row.attrs {
                Attributes::Country { country: c } if country.is_none() => {
                    country = Some((row.block.cidr.clone(), c.clone()));
                }
                Attributes::Asn { asn: a, provider } if asn.is_none() => {
                    asn = Some((*a, provider.clone()));
                }
                Attributes::City { city: c } if city.is_none() => {
                    city = Some(c.clone());
                }
                _ => {}
            }
        }

        let (cidr, country) = country?;
        let (asn, provider) = asn?;
        if require_city && city.is_none() {
            return None;
        }

        Some(Self {
            cidr,
            country,
            asn,
            provider,
            city,
        })
    }
}

// Raw row shapes as stored; decoded into `KindRow` once the version is known

#[derive(Debug, FromRow)]
pub(crate) struct CountryRow {
    pub addr: String,
    pub prefixlen: i32,
    pub cidr: String,
    pub country: String,
}

#[derive(Debug, FromRow)]
pub(crate) struct AsnRow {
    pub addr: String,
    pub prefixlen: i32,
    pub cidr: String,
    pub asn: i64,
    pub provider: String,
}

#[derive(Debug, FromRow)]
pub(crate) struct CityRow {
    pub addr: String,
    pub prefixlen: i32,
    pub cidr: String,
    pub city: String,
}

fn stored_block(
    version: IpVersion,
    addr: String,
    prefixlen: i32,
    cidr: String,
) -> Result<CidrBlock, CodecError> {
    let prefix_len = u8::try_from(prefixlen).map_err(|_| CodecError::PrefixLength {
        prefix_len: i64::from(prefixlen),
        bits: version.bit_width(),
    })?;
    CidrBlock::from_parts(EncodedAddress::from_bits(version, addr)?, prefix_len, cidr)
}

impl CountryRow {
    pub fn into_kind_row(self, version: IpVersion) -> Result<KindRow, CodecError> {
        Ok(KindRow::new(
            stored_block(version, self.addr, self.prefixlen, self.cidr)?,
            Attributes::Country {
                country: self.country,
            },
        ))
    }
}

impl AsnRow {
    pub fn into_kind_row(self, version: IpVersion) -> Result<KindRow, CodecError> {
        Ok(KindRow::new(
            stored_block(version, self.addr, self.prefixlen, self.cidr)?,
            Attributes::Asn {
                asn: self.asn,
                provider: self.provider,
            },
        ))
    }
}

impl CityRow {
    pub fn into_kind_row(self, version: IpVersion) -> Result<KindRow, CodecError> {
        Ok(KindRow::new(
            stored_block(version, self.addr, self.prefixlen, self.cidr)?,
            Attributes::City { city: self.city },
        ))
    }
}
