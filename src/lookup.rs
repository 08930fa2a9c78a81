//! Composite lookups across the per-kind tables
//!
//! Each kind is matched on its own. The rows that come back only have to
//! contain the queried address; they are not required to be the same block.
//! With per-kind datasets that do not overlap this yields the one block the
//! address belongs to, but nothing here enforces that.

use anyhow::Result;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::codec::{EncodedAddress, IpVersion};
use crate::matcher;
use crate::models::{GeoRecord, Kind};
use crate::storage::Storage;

pub struct LookupCoordinator {
    storage: Arc<dyn Storage>,
    city_v4: OnceCell<bool>,
    city_v6: OnceCell<bool>,
}

impl LookupCoordinator {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            city_v4: OnceCell::new(),
            city_v6: OnceCell::new(),
        }
    }

    /// Whether this deployment carries city tables, checked once per version
    async fn has_city(&self, version: IpVersion) -> Result<bool> {
        let cell = match version {
            IpVersion::V4 => &self.city_v4,
            IpVersion::V6 => &self.city_v6,
        };
        let present = cell
            .get_or_try_init(|| async {
                let present = self.storage.has_table(Kind::City, version).await?;
                debug!(%version, present, "city table detected");
                Ok::<_, anyhow::Error>(present)
            })
            .await?;
        Ok(*present)
    }

    /// Find the composite record for an address, or `None` when country or
    /// ASN (or city, where city tables exist) has no containing block
    pub async fn lookup(&self, addr: IpAddr) -> Result<Option<GeoRecord>> {
        let query = EncodedAddress::encode(addr);
        let with_city = self.has_city(query.version()).await?;

        let mut kinds = vec![Kind::Country, Kind::Asn];
        if with_city {
            kinds.push(Kind::City);
        }

        let rows = self.storage.find_containing(&query, &kinds).await?;
        debug_assert!(rows.iter().all(|r| matcher::contains(&r.block, &query)));
        debug!(%addr, matched = rows.len(), "per-kind matches");

        Ok(GeoRecord::combine(&rows, with_city))
    }
}
