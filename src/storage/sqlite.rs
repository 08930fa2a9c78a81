use crate::codec::{EncodedAddress, IpVersion};
use crate::matcher::ContainmentProbe;
use crate::models::{GeoRow, Kind, KindRow};
use crate::storage::sql::{self, Dialect};
use crate::storage::{Storage, StorageError, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{SqliteConnection, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

const DIALECT: Dialect = Dialect::Sqlite;

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        // LIKE must be case sensitive for SQLite to serve the prefilter from
        // the primary-key index
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .pragma("case_sensitive_like", "ON");
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

async fn update_row(conn: &mut SqliteConnection, cidr: &str, row: &KindRow) -> StorageResult<bool> {
    let statement = sql::update_by_cidr(DIALECT, row.table());
    let result = bind_row!(sqlx::query(&statement), row)
        .bind(cidr)
        .execute(&mut *conn)
        .await
        .map_err(|e| sql::write_error(e, &row.block.cidr))?;
    Ok(result.rows_affected() > 0)
}

/// All three kind-rows for `cidr` must be present before a composite write
async fn require_composite(
    conn: &mut SqliteConnection,
    version: IpVersion,
    cidr: &str,
) -> StorageResult<()> {
    let mut missing = Vec::new();
    for kind in Kind::ALL {
        let table = kind.table(version);
        let statement = sql::select_by_cidr(DIALECT, table);
        if fetch_kind_row!(&mut *conn, table, &statement, cidr)?.is_none() {
            missing.push(kind);
        }
    }

    match missing.len() {
        0 => Ok(()),
        n if n == Kind::ALL.len() => Err(StorageError::NotFound(cidr.to_string())),
        _ => {
            warn!(cidr, ?missing, "composite block is only partially stored");
            Err(StorageError::IncompleteComposite {
                cidr: cidr.to_string(),
                missing,
            })
        }
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn init_kinds(&self, kinds: &[Kind]) -> Result<()> {
        for kind in kinds {
            for version in [IpVersion::V4, IpVersion::V6] {
                for statement in sql::create_table(DIALECT, kind.table(version)) {
                    sqlx::query(&statement).execute(self.pool.as_ref()).await?;
                }
            }
        }
        Ok(())
    }

    async fn has_table(&self, kind: Kind, version: IpVersion) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>(sql::table_exists(DIALECT))
            .bind(kind.table(version).name)
            .fetch_one(self.pool.as_ref())
            .await?;
        Ok(count > 0)
    }

    async fn insert(&self, row: &KindRow) -> StorageResult<KindRow> {
        let statement = sql::insert(DIALECT, row.table());
        let result = bind_row!(sqlx::query(&statement), row)
            .execute(self.pool.as_ref())
            .await?;

        if result.rows_affected() == 0 {
            debug!(cidr = %row.block.cidr, table = row.table().name, "insert hit existing key");
            return Err(StorageError::DuplicateKey(row.block.cidr.clone()));
        }

        Ok(row.clone())
    }

    async fn find_by_cidr(
        &self,
        kind: Kind,
        version: IpVersion,
        cidr: &str,
    ) -> Result<Option<KindRow>> {
        let table = kind.table(version);
        let statement = sql::select_by_cidr(DIALECT, table);
        fetch_kind_row!(self.pool.as_ref(), table, &statement, cidr)
    }

    async fn update(&self, cidr: &str, row: &KindRow) -> StorageResult<KindRow> {
        let mut tx = self.pool.begin().await?;
        if !update_row(&mut tx, cidr, row).await? {
            return Err(StorageError::NotFound(cidr.to_string()));
        }
        tx.commit().await?;
        Ok(row.clone())
    }

    async fn delete(&self, kind: Kind, version: IpVersion, cidr: &str) -> Result<bool> {
        let result = sqlx::query(&sql::delete_by_cidr(DIALECT, kind.table(version)))
            .bind(cidr)
            .execute(self.pool.as_ref())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_composite(&self, record: &GeoRow) -> StorageResult<GeoRow> {
        self.require_tables(record.version()).await?;
        let rows = record.rows();
        let mut tx = self.pool.begin().await?;

        for row in &rows {
            let statement = sql::insert(DIALECT, row.table());
            let result = bind_row!(sqlx::query(&statement), row)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() == 0 {
                // Dropping the transaction rolls back earlier kinds
                debug!(cidr = %row.block.cidr, table = row.table().name, "composite insert hit existing key");
                return Err(StorageError::DuplicateKey(record.block.cidr.clone()));
            }
        }

        tx.commit().await?;
        info!(cidr = %record.block.cidr, "inserted composite block");
        Ok(record.clone())
    }

    async fn update_composite(&self, cidr: &str, record: &GeoRow) -> StorageResult<GeoRow> {
        self.require_tables(record.version()).await?;
        let rows = record.rows();
        let mut tx = self.pool.begin().await?;
        require_composite(&mut tx, record.version(), cidr).await?;

        for row in &rows {
            if !update_row(&mut tx, cidr, row).await? {
                return Err(StorageError::NotFound(cidr.to_string()));
            }
        }

        tx.commit().await?;
        info!(cidr, new_cidr = %record.block.cidr, "updated composite block");
        Ok(record.clone())
    }

    async fn delete_composite(&self, version: IpVersion, cidr: &str) -> StorageResult<()> {
        self.require_tables(version).await?;
        let mut tx = self.pool.begin().await?;
        require_composite(&mut tx, version, cidr).await?;

        for kind in Kind::ALL {
            sqlx::query(&sql::delete_by_cidr(DIALECT, kind.table(version)))
                .bind(cidr)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        info!(cidr, "deleted composite block");
        Ok(())
    }

    async fn find_containing(
        &self,
        query: &EncodedAddress,
        kinds: &[Kind],
    ) -> Result<Vec<KindRow>> {
        let probe = ContainmentProbe::new(query);
        let mut tx = self.pool.begin().await?;
        let mut found = Vec::with_capacity(kinds.len());

        for kind in kinds {
            let table = kind.table(query.version());
            let statement = sql::select_containing(DIALECT, table);
            let row = fetch_kind_row!(&mut *tx, table, &statement, probe.pattern(), probe.bits())?;
            if let Some(row) = row {
                found.push(row);
            }
        }

        tx.commit().await?;
        Ok(found)
    }
}
