//! triplecache - load RDF files into a remote SPARQL store through the
//! write-behind cache.
//!
//! Usage:
//!   triplecache --url http://localhost:7878 --flavor oxigraph load data/sensors.nq
//!   triplecache --config store.json count

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use oxigraph::io::{RdfFormat, RdfParser};
use tracing_subscriber::EnvFilter;
use triplecache::backend::triple_from_quad;
use triplecache::{
    Config, Connection, ConnectionConfig, Error, HttpStore, Result, StoreEndpoint, StoreFlavor,
};

#[derive(Parser, Debug)]
#[command(name = "triplecache")]
#[command(about = "Batch RDF statements into a remote SPARQL store")]
struct Args {
    /// JSON configuration file (store endpoint and cache settings)
    #[arg(short, long, conflicts_with = "url")]
    config: Option<PathBuf>,

    /// Store base URL
    #[arg(long, default_value = "http://localhost:7878")]
    url: String,

    /// Store flavor
    #[arg(long, value_enum, default_value = "oxigraph")]
    flavor: StoreFlavor,

    /// Bearer token sent with every request
    #[arg(long)]
    auth_token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load an N-Triples, N-Quads or Turtle file
    Load {
        file: PathBuf,

        /// Write cache capacity
        #[arg(long)]
        capacity: Option<usize>,
    },
    /// Print the number of statements in the store
    Count,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn load_config(args: &Args) -> Result<Config> {
    if let Some(path) = &args.config {
        return Config::from_file(path);
    }
    let mut store = StoreEndpoint::new(args.url.clone(), args.flavor);
    store.auth_token = args.auth_token.clone();
    Ok(Config { store, connection: ConnectionConfig::default() })
}

fn format_for(path: &Path) -> Result<RdfFormat> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
    RdfFormat::from_extension(extension)
        .ok_or_else(|| Error::Parse(format!("unsupported RDF file extension: {:?}", extension)))
}

async fn load(connection: &Connection, file: &Path) -> Result<u64> {
    let reader = BufReader::new(File::open(file)?);
    let mut loaded = 0u64;
    let mut skipped = 0u64;

    for quad in RdfParser::from_format(format_for(file)?).for_reader(reader) {
        let quad = quad.map_err(|e| Error::Parse(e.to_string()))?;
        match triple_from_quad(&quad) {
            Some(triple) => {
                connection.add_triples(vec![triple]).await?;
                loaded += 1;
            }
            None => skipped += 1,
        }
    }
    connection.sync().await?;

    if skipped > 0 {
        tracing::warn!(skipped, "Skipped statements with unsupported terms");
    }
    Ok(loaded)
}

async fn run(args: Args) -> Result<()> {
    let mut config = load_config(&args)?;
    if let Command::Load { capacity: Some(capacity), .. } = &args.command {
        config.connection.write_cache.capacity = *capacity;
    }

    let store = Arc::new(HttpStore::new(config.store.clone())?);
    let connection = Connection::open(store, config.connection).await?;

    let outcome = match &args.command {
        Command::Load { file, .. } => {
            let start = Instant::now();
            let loaded = load(&connection, file).await;
            loaded.map(|loaded| {
                tracing::info!(
                    loaded,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    file = %file.display(),
                    "Load complete"
                );
            })
        }
        Command::Count => Ok(()),
    };

    let outcome = match outcome {
        Ok(()) => connection.size(&[]).await.map(|size| println!("{}", size)),
        Err(e) => Err(e),
    };
    let closed = connection.close().await;
    outcome?;
    closed
}

#[tokio::main]
async fn main() {
    init_logging();
    let args = Args::parse();

    if let Err(e) = run(args).await {
        tracing::error!(error = %e, "triplecache failed");
        std::process::exit(1);
    }
}
