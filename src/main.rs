use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cidrgeo::config::Config;
use cidrgeo::{loader, storage};
use cidrgeo::{Attributes, GeoAttributes, GeoError, GeoService, Kind};

#[derive(Parser)]
#[command(name = "cidrgeo")]
#[command(about = "CIDR-indexed IP geolocation store", long_about = None)]
struct Cli {
    /// Optional TOML configuration file
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the kind-tables
    Init {
        /// Leave out the city tables
        #[arg(long)]
        no_city: bool,
    },
    /// Look up an address; without one, read addresses interactively
    Lookup { address: Option<String> },
    /// Insert a block into one kind-table, or all three with `all`
    Insert {
        #[command(subcommand)]
        record: RecordArgs,
    },
    /// Rewrite the block keyed by CIDR
    Update {
        /// CIDR of the existing block
        cidr: String,
        #[command(subcommand)]
        record: RecordArgs,
    },
    /// Delete a block from one kind-table, or from all three when no kind is given
    Delete {
        cidr: String,
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
    },
    /// Show the stored row for a CIDR
    Show {
        #[arg(value_enum)]
        kind: KindArg,
        cidr: String,
    },
    /// Load pre-encoded tab-separated rows into one kind-table
    Load {
        #[arg(value_enum)]
        kind: KindArg,
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum RecordArgs {
    Country {
        cidr: String,
        country: String,
    },
    Asn {
        cidr: String,
        asn: i64,
        provider: String,
    },
    City {
        cidr: String,
        city: String,
    },
    /// Country, ASN and city together, written atomically
    All {
        cidr: String,
        #[arg(long)]
        country: String,
        #[arg(long)]
        asn: i64,
        #[arg(long)]
        provider: String,
        #[arg(long)]
        city: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Country,
    Asn,
    City,
}

impl From<KindArg> for Kind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Country => Kind::Country,
            KindArg::Asn => Kind::Asn,
            KindArg::City => Kind::City,
        }
    }
}

enum Record {
    Single(String, Attributes),
    Composite(String, GeoAttributes),
}

impl From<RecordArgs> for Record {
    fn from(args: RecordArgs) -> Self {
        match args {
            RecordArgs::Country { cidr, country } => {
                Record::Single(cidr, Attributes::Country { country })
            }
            RecordArgs::Asn {
                cidr,
                asn,
                provider,
            } => Record::Single(cidr, Attributes::Asn { asn, provider }),
            RecordArgs::City { cidr, city } => Record::Single(cidr, Attributes::City { city }),
            RecordArgs::All {
                cidr,
                country,
                asn,
                provider,
                city,
            } => Record::Composite(
                cidr,
                GeoAttributes {
                    country,
                    asn,
                    provider,
                    city,
                },
            ),
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn repl(service: &GeoService) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("######## Please input an IP address (quit to exit) ########");
    loop {
        stdout.write_all(b"cidrgeo> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" {
            break;
        }

        match service.lookup(line).await {
            Ok(record) => print_json(&record)?,
            Err(e @ (GeoError::NotFound(_) | GeoError::InvalidAddress(_))) => println!("{e}"),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    let storage = storage::connect(&config.database).await?;
    let service = GeoService::new(storage.clone());

    match cli.command {
        Commands::Init { no_city } => {
            let kinds: &[Kind] = if no_city {
                &[Kind::Country, Kind::Asn]
            } else {
                &Kind::ALL
            };
            storage.init_kinds(kinds).await?;
            info!(?kinds, "Database initialized successfully");
        }
        Commands::Lookup { address: Some(address) } => {
            print_json(&service.lookup(&address).await?)?;
        }
        Commands::Lookup { address: None } => repl(&service).await?,
        Commands::Insert { record } => match Record::from(record) {
            Record::Single(cidr, attrs) => print_json(&service.insert(&cidr, attrs).await?)?,
            Record::Composite(cidr, attrs) => {
                print_json(&service.insert_composite(&cidr, attrs).await?)?
            }
        },
        Commands::Update { cidr, record } => match Record::from(record) {
            Record::Single(new_cidr, attrs) => {
                print_json(&service.update(&cidr, &new_cidr, attrs).await?)?
            }
            Record::Composite(new_cidr, attrs) => {
                print_json(&service.update_composite(&cidr, &new_cidr, attrs).await?)?
            }
        },
        Commands::Delete {
            cidr,
            kind: Some(kind),
        } => {
            let removed = service.delete(kind.into(), &cidr).await?;
            if removed {
                println!("✓ Deleted {cidr}");
            } else {
                println!("⚠ {cidr} was not stored");
            }
        }
        Commands::Delete { cidr, kind: None } => {
            service.delete_composite(&cidr).await?;
            println!("✓ Deleted {cidr}");
        }
        Commands::Show { kind, cidr } => {
            print_json(&service.find(kind.into(), &cidr).await?)?;
        }
        Commands::Load { kind, file } => {
            let handle = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("failed to open {}", file.display()))?;
            let summary = loader::load(storage.as_ref(), kind.into(), BufReader::new(handle)).await?;
            print_json(&summary)?;
        }
    }

    Ok(())
}
