//! Prefix-containment matching
//!
//! A stored block contains a query address when the query, truncated to the
//! block's own prefix length, equals the block's network bits. Backends run
//! this in two stages: an index-friendly `LIKE 'prefix%'` filter on the first
//! `prefilter_len` characters, then the exact per-row containment test.
//!
//! Overlapping blocks are not resolved. When more than one row contains the
//! query, whichever one the backend yields first is used.

use crate::codec::{CidrBlock, EncodedAddress};
#[cfg(test)]
use crate::models::KindRow;

/// Bind values for a containment query against one kind-table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainmentProbe {
    pattern: String,
    bits: String,
}

impl ContainmentProbe {
    pub fn new(query: &EncodedAddress) -> Self {
        Self {
            pattern: format!("{}%", query.prefilter()),
            bits: query.as_str().to_string(),
        }
    }

    /// `LIKE` pattern for the coarse stage
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Full query bits for the exact stage
    pub fn bits(&self) -> &str {
        &self.bits
    }
}

/// Coarse stage: shares the first `prefilter_len` characters with the query,
/// or is too short for that comparison to mean anything
#[cfg(test)]
fn passes_prefilter(block: &CidrBlock, query: &EncodedAddress) -> bool {
    block.version() == query.version()
        && (usize::from(block.prefix_len) < query.version().prefilter_len()
            || block.addr.prefilter() == query.prefilter())
}

/// Exact stage: the block contains the query address
pub fn contains(block: &CidrBlock, query: &EncodedAddress) -> bool {
    block.version() == query.version()
        && query.truncate(usize::from(block.prefix_len)) == block.network_bits()
}

/// Both stages over an in-memory candidate set, in the order the backends
/// apply them. Returns the first row that survives.
#[cfg(test)]
fn find_containing<'a, I>(rows: I, query: &EncodedAddress) -> Option<&'a KindRow>
where
    I: IntoIterator<Item = &'a KindRow>,
{
    rows.into_iter()
        .find(|row| passes_prefilter(&row.block, query) && contains(&row.block, query))
}
