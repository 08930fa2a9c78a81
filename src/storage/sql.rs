//! SQL text shared by the SQLite and PostgreSQL backends
//!
//! Statements differ only in placeholder syntax and a few column types, so
//! they are rendered from the table descriptor for either dialect.

use crate::codec::IpVersion;
use crate::models::Table;
use crate::storage::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    fn param(self, n: usize) -> String {
        match self {
            Dialect::Sqlite => "?".to_string(),
            Dialect::Postgres => format!("${n}"),
        }
    }

    fn column_type(self, column: &str, version: IpVersion) -> String {
        match (self, column) {
            (Dialect::Sqlite, "prefixlen" | "asn") => "INTEGER".to_string(),
            (Dialect::Sqlite, _) => "TEXT".to_string(),
            (Dialect::Postgres, "addr") => format!("VARCHAR({})", version.bit_width()),
            (Dialect::Postgres, "prefixlen") => "INTEGER".to_string(),
            (Dialect::Postgres, "asn") => "BIGINT".to_string(),
            (Dialect::Postgres, _) => "TEXT".to_string(),
        }
    }
}

fn columns(table: Table) -> Vec<&'static str> {
    let mut columns = vec!["addr", "prefixlen", "cidr"];
    columns.extend_from_slice(table.kind.attr_columns());
    columns
}

/// Table DDL plus any supporting indexes, in execution order
pub(crate) fn create_table(dialect: Dialect, table: Table) -> Vec<String> {
    let attrs: Vec<String> = table
        .kind
        .attr_columns()
        .iter()
        .map(|c| format!("{c} {} NOT NULL", dialect.column_type(c, table.version)))
        .collect();

    let mut statements = vec![format!(
        "CREATE TABLE IF NOT EXISTS {name} (\
         addr {addr} NOT NULL PRIMARY KEY, \
         prefixlen {prefixlen} NOT NULL, \
         cidr {cidr} NOT NULL UNIQUE, \
         {attrs})",
        name = table.name,
        addr = dialect.column_type("addr", table.version),
        prefixlen = dialect.column_type("prefixlen", table.version),
        cidr = dialect.column_type("cidr", table.version),
        attrs = attrs.join(", "),
    )];

    // Postgres only uses a btree for LIKE 'prefix%' under pattern ops
    if dialect == Dialect::Postgres {
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS {name}_addr_pattern ON {name} (addr text_pattern_ops)",
            name = table.name
        ));
    }
    // Serves the short-prefix arm of the containment match
    statements.push(format!(
        "CREATE INDEX IF NOT EXISTS {name}_prefixlen ON {name} (prefixlen)",
        name = table.name
    ));
    statements
}

pub(crate) fn table_exists(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Sqlite => "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        Dialect::Postgres => {
            "SELECT COUNT(*) FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name::text = $1"
        }
    }
}

pub(crate) fn insert(dialect: Dialect, table: Table) -> String {
    let columns = columns(table);
    let params: Vec<String> = (1..=columns.len()).map(|n| dialect.param(n)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT DO NOTHING",
        table.name,
        columns.join(", "),
        params.join(", ")
    )
}

pub(crate) fn select_by_cidr(dialect: Dialect, table: Table) -> String {
    format!(
        "SELECT {} FROM {} WHERE cidr = {}",
        columns(table).join(", "),
        table.name,
        dialect.param(1)
    )
}

/// Rewrites every column; the old CIDR is bound last
pub(crate) fn update_by_cidr(dialect: Dialect, table: Table) -> String {
    let columns = columns(table);
    let assignments: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{c} = {}", dialect.param(i + 1)))
        .collect();
    format!(
        "UPDATE {} SET {} WHERE cidr = {}",
        table.name,
        assignments.join(", "),
        dialect.param(columns.len() + 1)
    )
}

pub(crate) fn delete_by_cidr(dialect: Dialect, table: Table) -> String {
    format!("DELETE FROM {} WHERE cidr = {}", table.name, dialect.param(1))
}

/// Two-stage containment match: binds the prefilter pattern, then the
/// full query bits. Blocks shorter than the prefilter bypass the coarse
/// stage, since their stored bits past the prefix need not match the query.
pub(crate) fn select_containing(dialect: Dialect, table: Table) -> String {
    format!(
        "SELECT {} FROM {} \
         WHERE (addr LIKE {} OR prefixlen < {}) \
         AND substr(addr, 1, prefixlen) = substr({}, 1, prefixlen) \
         LIMIT 1",
        columns(table).join(", "),
        table.name,
        dialect.param(1),
        table.version.prefilter_len(),
        dialect.param(2)
    )
}

/// Map a failed write, turning unique-constraint violations into
/// `DuplicateKey`
pub(crate) fn write_error(err: sqlx::Error, cidr: &str) -> StorageError {
    let unique = err
        .as_database_error()
        .is_some_and(|db| db.is_unique_violation());
    if unique {
        StorageError::DuplicateKey(cidr.to_string())
    } else {
        err.into()
    }
}

/// Bind a kind-row's columns in `columns()` order
macro_rules! bind_row {
    ($query:expr, $row:expr) => {{
        let row: &$crate::models::KindRow = $row;
        let query = $query
            .bind(row.block.addr.as_str())
            .bind(i32::from(row.block.prefix_len))
            .bind(row.block.cidr.as_str());
        match &row.attrs {
            $crate::models::Attributes::Country { country } => query.bind(country.as_str()),
            $crate::models::Attributes::Asn { asn, provider } => {
                query.bind(*asn).bind(provider.as_str())
            }
            $crate::models::Attributes::City { city } => query.bind(city.as_str()),
        }
    }};
}

/// Fetch at most one row of the table's kind, decoded as a `KindRow`.
/// Evaluates to `anyhow::Result<Option<KindRow>>`.
macro_rules! fetch_kind_row {
    ($executor:expr, $table:expr, $sql:expr $(, $arg:expr)* $(,)?) => {{
        let table: $crate::models::Table = $table;
        let sql: &str = $sql;
        let fetched: ::anyhow::Result<Option<$crate::models::KindRow>> = match table.kind {
            $crate::models::Kind::Country => {
                sqlx::query_as::<_, $crate::models::CountryRow>(sql)
                    $(.bind($arg))*
                    .fetch_optional($executor)
                    .await
                    .map_err(::anyhow::Error::from)
                    .and_then(|found| {
                        found
                            .map(|r| r.into_kind_row(table.version))
                            .transpose()
                            .map_err(::anyhow::Error::from)
                    })
            }
            $crate::models::Kind::Asn => {
                sqlx::query_as::<_, $crate::models::AsnRow>(sql)
                    $(.bind($arg))*
                    .fetch_optional($executor)
                    .await
                    .map_err(::anyhow::Error::from)
                    .and_then(|found| {
                        found
                            .map(|r| r.into_kind_row(table.version))
                            .transpose()
                            .map_err(::anyhow::Error::from)
                    })
            }
            $crate::models::Kind::City => {
                sqlx::query_as::<_, $crate::models::CityRow>(sql)
                    $(.bind($arg))*
                    .fetch_optional($executor)
                    .await
                    .map_err(::anyhow::Error::from)
                    .and_then(|found| {
                        found
                            .map(|r| r.into_kind_row(table.version))
                            .transpose()
                            .map_err(::anyhow::Error::from)
                    })
            }
        };
        fetched
    }};
}
