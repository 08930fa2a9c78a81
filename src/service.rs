//! Consumer-facing operations over an injected storage handle
//!
//! Address and CIDR text is parsed here; everything below works on encoded
//! blocks.

use ipnet::IpNet;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::codec::CidrBlock;
use crate::error::{GeoError, GeoResult};
use crate::lookup::LookupCoordinator;
use crate::models::{Attributes, GeoAttributes, GeoRecord, GeoRow, Kind, KindRow};
use crate::storage::Storage;

pub struct GeoService {
    storage: Arc<dyn Storage>,
    coordinator: LookupCoordinator,
}

/// Parse an address in either family
pub fn parse_address(text: &str) -> GeoResult<IpAddr> {
    text.trim()
        .parse::<IpAddr>()
        .map_err(|_| GeoError::InvalidAddress(text.to_string()))
}

/// Parse a CIDR, rejecting networks with host bits set
pub fn parse_network(text: &str) -> GeoResult<IpNet> {
    let net = text
        .trim()
        .parse::<IpNet>()
        .map_err(|_| GeoError::InvalidAddress(text.to_string()))?;
    if net.trunc() != net {
        return Err(GeoError::InvalidAddress(format!("{text} has host bits set")));
    }
    Ok(net)
}

fn same_family(old: &CidrBlock, new: &CidrBlock) -> GeoResult<()> {
    if old.version() != new.version() {
        return Err(GeoError::InvalidAddress(format!(
            "cannot move {} to {}",
            old.cidr, new.cidr
        )));
    }
    Ok(())
}

impl GeoService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        let coordinator = LookupCoordinator::new(Arc::clone(&storage));
        Self {
            storage,
            coordinator,
        }
    }

    pub async fn lookup(&self, address: &str) -> GeoResult<GeoRecord> {
        let addr = parse_address(address)?;
        match self.coordinator.lookup(addr).await? {
            Some(record) => Ok(record),
            None => {
                debug!(%addr, "no containing block");
                Err(GeoError::NotFound(addr.to_string()))
            }
        }
    }

    pub async fn insert(&self, cidr: &str, attrs: Attributes) -> GeoResult<KindRow> {
        let block = CidrBlock::from_network(parse_network(cidr)?);
        let row = self.storage.insert(&KindRow::new(block, attrs)).await?;
        info!(cidr = %row.block.cidr, kind = %row.kind(), "inserted block");
        Ok(row)
    }

    pub async fn insert_composite(&self, cidr: &str, attrs: GeoAttributes) -> GeoResult<GeoRecord> {
        let block = CidrBlock::from_network(parse_network(cidr)?);
        let row = self
            .storage
            .insert_composite(&GeoRow::new(block, attrs))
            .await?;
        Ok(row.to_record())
    }

    /// Rewrite the row of `attrs`' kind keyed by `cidr` with a new block and payload
    pub async fn update(&self, cidr: &str, new_cidr: &str, attrs: Attributes) -> GeoResult<KindRow> {
        let old = CidrBlock::from_network(parse_network(cidr)?);
        let block = CidrBlock::from_network(parse_network(new_cidr)?);
        same_family(&old, &block)?;

        let row = self
            .storage
            .update(&old.cidr, &KindRow::new(block, attrs))
            .await?;
        info!(cidr = %old.cidr, new_cidr = %row.block.cidr, kind = %row.kind(), "updated block");
        Ok(row)
    }

    pub async fn update_composite(
        &self,
        cidr: &str,
        new_cidr: &str,
        attrs: GeoAttributes,
    ) -> GeoResult<GeoRecord> {
        let old = CidrBlock::from_network(parse_network(cidr)?);
        let block = CidrBlock::from_network(parse_network(new_cidr)?);
        same_family(&old, &block)?;

        let row = self
            .storage
            .update_composite(&old.cidr, &GeoRow::new(block, attrs))
            .await?;
        Ok(row.to_record())
    }

    /// Single-kind delete; absence is not an error
    pub async fn delete(&self, kind: Kind, cidr: &str) -> GeoResult<bool> {
        let block = CidrBlock::from_network(parse_network(cidr)?);
        let removed = self
            .storage
            .delete(kind, block.version(), &block.cidr)
            .await?;
        debug!(cidr = %block.cidr, %kind, removed, "delete");
        Ok(removed)
    }

    pub async fn delete_composite(&self, cidr: &str) -> GeoResult<()> {
        let block = CidrBlock::from_network(parse_network(cidr)?);
        self.storage
            .delete_composite(block.version(), &block.cidr)
            .await?;
        Ok(())
    }

    pub async fn find(&self, kind: Kind, cidr: &str) -> GeoResult<KindRow> {
        let block = CidrBlock::from_network(parse_network(cidr)?);
        self.storage
            .find_by_cidr(kind, block.version(), &block.cidr)
            .await?
            .ok_or_else(|| GeoError::NotFound(block.cidr.clone()))
    }
}
