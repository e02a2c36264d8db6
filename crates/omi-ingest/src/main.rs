//! `omi-import`: load OMI semiannual archives into a SQLite zone store.
//!
//! # Usage
//!
//! ```
//! omi-import data/omi omi.sqlite
//! omi-import --reset --parallelism 4
//! omi-import --locate 8.6155 44.9125 --semester 2024_S2
//! ```

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use clap::Parser;
use omi_core::{Semester, store::ZoneStore};
use omi_ingest::{IngestConfig, Orchestrator};
use omi_store_sqlite::SqliteStore;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "OMI zone and quotation importer")]
struct Cli {
  /// Directory holding the semiannual `*.zip` archives.
  source_dir: Option<PathBuf>,

  /// SQLite database file.
  database: Option<PathBuf>,

  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "omi.toml")]
  config: PathBuf,

  /// Empty both tables, then reimport every archive.
  #[arg(long)]
  reset: bool,

  /// Semesters loaded concurrently.
  #[arg(long)]
  parallelism: Option<usize>,

  /// Print the zone at a point and exit.
  #[arg(long, num_args = 2, value_names = ["LON", "LAT"], allow_negative_numbers = true)]
  locate: Option<Vec<f64>>,

  /// Semester for `--locate`; the latest loaded one by default.
  #[arg(long, requires = "locate")]
  semester: Option<Semester>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let mut cfg = IngestConfig::load(&cli.config).context("failed to read configuration")?;
  if let Some(dir) = cli.source_dir {
    cfg.source_dir = dir;
  }
  if let Some(db) = cli.database {
    cfg.database = db;
  }
  if let Some(n) = cli.parallelism {
    cfg.parallelism = n;
  }
  let cfg = cfg.clamped();

  let db_path = expand_tilde(&cfg.database);
  let store = SqliteStore::open(&db_path)
    .await
    .with_context(|| format!("failed to open store at {db_path:?}"))?;

  if let Some(point) = cli.locate {
    return locate(&store, point[0], point[1], cli.semester, cfg.locate_buffer_m).await;
  }

  let source_dir = expand_tilde(&cfg.source_dir);
  let cfg = IngestConfig { source_dir, ..cfg };
  let report = Orchestrator::new(Arc::new(store), cfg)
    .run(cli.reset)
    .await
    .context("import aborted")?;

  print!("{report}");
  Ok(())
}

/// Helper mode: print the zone at (`lon`, `lat`) and its quotations.
async fn locate(
  store: &SqliteStore,
  lon: f64,
  lat: f64,
  semester: Option<Semester>,
  buffer_m: f64,
) -> anyhow::Result<()> {
  let semester = match semester {
    Some(s) => s,
    None => {
      let loaded = store.list_semesters().await.context("failed to list semesters")?;
      *loaded.first().context("the store holds no semester")?
    }
  };

  let Some(zone) = store
    .locate_zone(lon, lat, semester, buffer_m)
    .await
    .context("spatial lookup failed")?
  else {
    println!("no zone within {buffer_m} m of ({lon}, {lat}) in {semester}");
    return Ok(());
  };

  let place = zone.municipality_name.as_deref().unwrap_or("?");
  match zone.distance_m {
    None => println!("{} {semester}: {place} zone {}", zone.join_key, zone.zone_code),
    Some(d) => println!("{} {semester}: {place} zone {} ({d:.0} m away)", zone.join_key, zone.zone_code),
  }
  if let Some(description) = &zone.description {
    println!("  {description}");
  }

  let quotations = store
    .quotations_for_zone(&zone.join_key, semester)
    .await
    .context("failed to read quotations")?;
  for q in quotations {
    let marker = if q.is_prevalent { "*" } else { " " };
    println!(
      " {marker} {:>3} {:<30} {:<10} sale {}-{} rent {}-{}",
      q.property_type_code,
      q.property_type_desc.as_deref().unwrap_or(""),
      q.conservation_state,
      fmt_price(q.price_min),
      fmt_price(q.price_max),
      fmt_price(q.rent_min),
      fmt_price(q.rent_max),
    );
  }
  Ok(())
}

fn fmt_price(v: Option<f64>) -> String { v.map(|v| format!("{v}")).unwrap_or_else(|| "-".into()) }

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
