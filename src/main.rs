use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dualdex::index::stats;
use dualdex::index::{
    CancellationToken, Crawler, DualDirectoryIndex, FsCrawler, IndexProperties, IndexingOptions, Mode, SourceItem,
};
use dualdex::output;
use dualdex::store::{FileBackend, IndexPropertyStore, IndexStores, PropertyStore};
use dualdex::utils::{self, AppConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "dualdex")]
#[command(about = "Sharded search index that rebuilds into a standby copy and switches on completion")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Full rebuild into the standby directories, then switch
    Rebuild {
        /// Index name
        name: String,

        /// Folder to crawl (remembered for later rebuilds)
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Hide progress bars
        #[arg(short, long)]
        quiet: bool,
    },
    /// Re-index or delete individual files on the active side
    Update {
        /// Index name
        name: String,

        /// Files relative to the source folder; missing files are deleted
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Search the active side
    Search {
        /// Index name
        name: String,

        /// Query terms (all must match)
        #[arg(required = true, trailing_var_arg = true)]
        query: Vec<String>,

        /// Maximum number of results (0 for all)
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
    /// Show active mode and per-shard timestamps
    Status {
        /// Index name
        name: String,
    },
    /// Show the persisted properties of an index
    Props {
        /// Index name
        name: String,
    },
    /// Switch the active side without rebuilding
    Switch {
        /// Index name
        name: String,

        /// Side to activate (defaults to the inactive one)
        #[arg(long)]
        to: Option<Mode>,
    },
    /// List all indexes
    List,
    /// Remove an index and its properties
    Remove {
        /// Index name
        name: String,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load()?;
    let color = !cli.no_color;

    match cli.command {
        Commands::Rebuild { name, source, quiet } => {
            let (mut index, _store) = open_index(&name, &config)?;

            let source = match source {
                Some(source) => source
                    .canonicalize()
                    .with_context(|| format!("Source folder {} not found", source.display()))?,
                None => source_root(&index)?,
            };
            index.set_property(IndexProperties::SOURCE_ROOT, &source.to_string_lossy())?;

            index.add_crawler(Arc::new(fs_crawler(&source, &config)?));

            let options = IndexingOptions {
                batch_size: config.batch_size.max(1),
                parallel: true,
                silent: quiet,
            };
            if !quiet {
                println!("Rebuilding {} from {}", name, source.display());
            }
            let summary = index.rebuild(&options, &CancellationToken::new())?;
            println!(
                "Indexed {} documents ({} skipped), now serving {}",
                summary.documents, summary.skipped, summary.active
            );
        }
        Commands::Update { name, paths } => {
            let (index, _store) = open_index(&name, &config)?;
            let source = source_root(&index)?;
            let crawler = fs_crawler(&source, &config)?;

            let mut context = index.update_context()?;
            let (mut updated, mut deleted) = (0, 0);
            for path in paths {
                let full = if path.is_absolute() { path } else { source.join(path) };
                let rel = full
                    .strip_prefix(&source)
                    .with_context(|| format!("{} is outside {}", full.display(), source.display()))?;
                let id = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");

                let item = SourceItem {
                    id: id.clone(),
                    path: Some(full.clone()),
                };
                match full.is_file().then(|| crawler.load(&item)).flatten() {
                    Some(document) => {
                        context.update_document(document)?;
                        updated += 1;
                    }
                    None => {
                        context.delete_document(&id)?;
                        deleted += 1;
                    }
                }
            }
            context.commit()?;
            println!("{} updated, {} deleted on {} side", updated, deleted, index.mode());
        }
        Commands::Search { name, query, limit } => {
            let (index, _store) = open_index(&name, &config)?;
            let hits = index.search(&query.join(" "), limit)?;
            if hits.is_empty() {
                println!("No matches.");
            } else {
                output::print_hits(&hits, color)?;
            }
        }
        Commands::Status { name } => {
            let (index, _store) = open_index(&name, &config)?;
            stats::show_status(&index, color)?;
        }
        Commands::Props { name } => {
            let (index, store) = open_index(&name, &config)?;
            index.ensure_initialized()?;
            output::print_properties(&store.entries()?, color)?;
        }
        Commands::Switch { name, to } => {
            let (index, _store) = open_index(&name, &config)?;
            let mode = match to {
                Some(mode) => index.switch_directories_to(mode)?,
                None => index.switch_directories()?,
            };
            println!("{} now serving {}", name, mode);
        }
        Commands::List => {
            stats::list_indexes()?;
        }
        Commands::Remove { name } => {
            let (_index, store) = open_index(&name, &config)?;
            store.clear_all()?;
            if utils::remove_index_dir(&name)? {
                println!("Removed index: {}", name);
            } else {
                println!("No index named {}", name);
            }
        }
    }

    Ok(())
}

/// Index backed by the shared property file in the app data directory
fn open_index(name: &str, config: &AppConfig) -> Result<(DualDirectoryIndex, Arc<IndexPropertyStore>)> {
    let folder = utils::get_index_dir(name)?;
    let backend = FileBackend::open(&utils::get_properties_path()?).context("Failed to open property store")?;
    let store = Arc::new(
        IndexPropertyStore::new(config.instance_name.clone())
            .with_key(name)
            .with_backend(backend),
    );
    let index = DualDirectoryIndex::new(name, folder, config.index_config(), IndexStores::extended(store.clone()));
    Ok((index, store))
}

fn source_root(index: &DualDirectoryIndex) -> Result<PathBuf> {
    let source = index.get_property(IndexProperties::SOURCE_ROOT)?;
    if source.is_empty() {
        anyhow::bail!("No source folder recorded for {}; pass --source", index.name());
    }
    Ok(PathBuf::from(source))
}

fn fs_crawler(source: &Path, config: &AppConfig) -> Result<FsCrawler> {
    Ok(FsCrawler::new(source)
        .with_ignored(config.ignored_paths.as_slice())?
        .with_max_file_size(config.max_file_size))
}
