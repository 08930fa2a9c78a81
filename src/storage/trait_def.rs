use crate::codec::{EncodedAddress, IpVersion};
use crate::models::{GeoRow, Kind, KindRow};
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("block {0} already exists")]
    DuplicateKey(String),
    #[error("block {0} not found")]
    NotFound(String),
    #[error("composite block {cidr} is missing {missing:?} rows")]
    IncompleteComposite { cidr: String, missing: Vec<Kind> },
    #[error("table {0} has not been initialised; composite writes need all three kinds")]
    MissingTable(&'static str),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Other(err.into())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Create all six kind-tables
    async fn init(&self) -> Result<()> {
        self.init_kinds(&Kind::ALL).await
    }

    /// Create the tables for the given kinds only (both versions)
    async fn init_kinds(&self, kinds: &[Kind]) -> Result<()>;

    /// Schema introspection: does the kind-table exist in this deployment
    async fn has_table(&self, kind: Kind, version: IpVersion) -> Result<bool>;

    /// Fail with `MissingTable` unless every kind-table of `version` exists
    async fn require_tables(&self, version: IpVersion) -> StorageResult<()> {
        for kind in Kind::ALL {
            if !self.has_table(kind, version).await? {
                return Err(StorageError::MissingTable(kind.table(version).name));
            }
        }
        Ok(())
    }

    /// Insert a single kind-row; fails with `DuplicateKey` on any key collision
    async fn insert(&self, row: &KindRow) -> StorageResult<KindRow>;

    /// Exact lookup by canonical CIDR text
    async fn find_by_cidr(
        &self,
        kind: Kind,
        version: IpVersion,
        cidr: &str,
    ) -> Result<Option<KindRow>>;

    /// Rewrite every column of the row currently keyed by `cidr`
    async fn update(&self, cidr: &str, row: &KindRow) -> StorageResult<KindRow>;

    /// Remove the row keyed by `cidr`; returns whether a row was removed
    async fn delete(&self, kind: Kind, version: IpVersion, cidr: &str) -> Result<bool>;

    /// Insert all three kind-rows in one transaction
    async fn insert_composite(&self, record: &GeoRow) -> StorageResult<GeoRow>;

    /// Rewrite all three kind-rows keyed by `cidr` in one transaction
    async fn update_composite(&self, cidr: &str, record: &GeoRow) -> StorageResult<GeoRow>;

    /// Delete all three kind-rows keyed by `cidr` in one transaction
    async fn delete_composite(&self, version: IpVersion, cidr: &str) -> StorageResult<()>;

    /// Run the containment match against each requested kind-table inside
    /// one read transaction. Returns at most one row per kind.
    async fn find_containing(&self, query: &EncodedAddress, kinds: &[Kind])
        -> Result<Vec<KindRow>>;
}
