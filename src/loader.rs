//! Bulk loading of pre-encoded dataset rows
//!
//! Input is tab separated, one block per line:
//!
//! ```text
//! <encoded addr>\t<prefix length>\t<cidr>\t<attribute columns...>
//! ```
//!
//! The attribute columns are `country`, `asn\tprovider` or `city` depending
//! on the kind being loaded. Rows are trusted to be encoded correctly; only
//! width, alphabet and prefix range are checked.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

use crate::codec::{CidrBlock, EncodedAddress, IpVersion};
use crate::models::{Attributes, Kind, KindRow};
use crate::storage::{Storage, StorageError};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub inserted: u64,
    pub duplicates: u64,
    pub rejected: u64,
}

/// Parse one line into a kind-row
pub fn parse_line(kind: Kind, line: &str) -> Result<KindRow> {
    let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('\t').collect();
    let expected = 3 + kind.attr_columns().len();
    if fields.len() != expected {
        bail!("expected {expected} fields, got {}", fields.len());
    }

    let version = match fields[0].len() {
        32 => IpVersion::V4,
        128 => IpVersion::V6,
        n => bail!("encoded address has unsupported width {n}"),
    };
    let addr = EncodedAddress::from_bits(version, fields[0])?;
    let prefix_len = fields[1]
        .parse::<u8>()
        .with_context(|| format!("bad prefix length {:?}", fields[1]))?;
    let block = CidrBlock::from_parts(addr, prefix_len, fields[2])?;

    let attrs = match kind {
        Kind::Country => Attributes::Country {
            country: fields[3].to_string(),
        },
        Kind::Asn => Attributes::Asn {
            asn: fields[3]
                .parse()
                .with_context(|| format!("bad asn {:?}", fields[3]))?,
            provider: fields[4].to_string(),
        },
        Kind::City => Attributes::City {
            city: fields[3].to_string(),
        },
    };

    Ok(KindRow::new(block, attrs))
}

/// Insert every row read from `reader` into the kind-tables. Malformed lines
/// and duplicates are counted and skipped; storage failures abort the load.
pub async fn load<R>(storage: &dyn Storage, kind: Kind, reader: R) -> Result<LoadSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut summary = LoadSummary::default();
    let mut lines = reader.lines();
    let mut line_no = 0u64;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let row = match parse_line(kind, &line) {
            Ok(row) => row,
            Err(e) => {
                warn!(line = line_no, "skipping malformed row: {e:#}");
                summary.rejected += 1;
                continue;
            }
        };

        match storage.insert(&row).await {
            Ok(_) => summary.inserted += 1,
            Err(StorageError::DuplicateKey(_)) => summary.duplicates += 1,
            Err(e) => return Err(anyhow::Error::new(e).context(format!("line {line_no}"))),
        }
    }

    info!(
        %kind,
        inserted = summary.inserted,
        duplicates = summary.duplicates,
        rejected = summary.rejected,
        "load finished"
    );
    Ok(summary)
}
