use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use vocab_overlay::dom::filter::FAB_ID;
use vocab_overlay::dom::parser::parse_html;
use vocab_overlay::dom::serialize::document_to_html;
use vocab_overlay::engine::Session;
use vocab_overlay::net::fetch::fetch_page;
use vocab_overlay::settings::EngineConfig;
use vocab_overlay::vocab::export::{export_csv, newest_first};
use vocab_overlay::vocab::store::JsonFileStore;
use vocab_overlay::vocab::{read_all, VocabularyEntry, VocabularyIndex};

#[derive(Parser)]
#[command(name = "vocab-overlay", about = "Annotate pages with saved vocabulary", version)]
struct Cli {
    /// JSON file holding vocabulary and settings.
    #[arg(long, global = true, value_name = "FILE", default_value = "vocabulary.json")]
    store: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Annotate a page and write the resulting HTML.
    Annotate(AnnotateArgs),
    /// Save a word for a page.
    Add(AddArgs),
    /// Delete a word saved for a page.
    Remove(RemoveArgs),
    /// Print saved words as CSV, newest first.
    Export(ExportArgs),
}

#[derive(Args)]
struct AnnotateArgs {
    /// Page URL; saved words are looked up by it.
    #[arg(long)]
    url: String,
    /// Read HTML from this file instead of fetching the URL.
    #[arg(long, conflicts_with = "fetch")]
    input: Option<PathBuf>,
    /// Fetch the page from the network.
    #[arg(long)]
    fetch: bool,
    /// Engine configuration (TOML).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Output file; stdout when omitted.
    #[arg(long, short)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct AddArgs {
    #[arg(long)]
    url: String,
    #[arg(long)]
    word: String,
    #[arg(long)]
    translation: String,
    #[arg(long)]
    color: Option<String>,
}

#[derive(Args)]
struct RemoveArgs {
    #[arg(long)]
    url: String,
    #[arg(long)]
    word: String,
}

#[derive(Args)]
struct ExportArgs {
    /// Only words saved for this page.
    #[arg(long)]
    url: Option<String>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Annotate(args) => annotate(&cli.store, args),
        Commands::Add(args) => add(&cli.store, args),
        Commands::Remove(args) => remove(&cli.store, args),
        Commands::Export(args) => export(&cli.store, args),
    }
}

fn open_store(path: &Path) -> Result<JsonFileStore> {
    JsonFileStore::open(path).with_context(|| format!("failed to open store {}", path.display()))
}

fn annotate(store_path: &Path, args: AnnotateArgs) -> Result<()> {
    let html = match (&args.input, args.fetch) {
        (Some(path), _) => fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?,
        (None, true) => fetch_page(&args.url)?.html,
        (None, false) => bail!("either --input or --fetch is required"),
    };
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    let store = open_store(store_path)?;
    let doc = parse_html(&html, &args.url);
    let mut session = Session::new(doc, Box::new(store), config);
    session.start()?;
    let annotated = session.vocabulary().entries().len();

    let mut doc = session.into_document();
    if let Some(fab) = doc.get_element_by_id(FAB_ID) {
        doc.remove(fab)?;
    }
    let output = document_to_html(&doc);
    match &args.output {
        Some(path) => fs::write(path, output).with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{}", output),
    }
    log::info!("annotated {} with {} saved words", args.url, annotated);
    Ok(())
}

fn add(store_path: &Path, args: AddArgs) -> Result<()> {
    let mut store = open_store(store_path)?;
    let mut index = VocabularyIndex::new(args.url.clone());
    let entry = VocabularyEntry::new(args.word.trim(), args.translation.trim(), args.url).with_color(args.color);
    if index.add(&mut store, entry)? {
        println!("saved \"{}\"", args.word.trim());
    } else {
        println!("\"{}\" is already saved for this page", args.word.trim());
    }
    Ok(())
}

fn remove(store_path: &Path, args: RemoveArgs) -> Result<()> {
    let mut store = open_store(store_path)?;
    let mut index = VocabularyIndex::new(args.url.clone());
    let removed = index.remove(&mut store, &args.word, &args.url)?;
    println!("removed {} entr{}", removed, if removed == 1 { "y" } else { "ies" });
    Ok(())
}

fn export(store_path: &Path, args: ExportArgs) -> Result<()> {
    let store = open_store(store_path)?;
    let mut entries = read_all(&store)?;
    if let Some(url) = &args.url {
        entries.retain(|e| &e.url == url);
    }
    newest_first(&mut entries);
    println!("{}", export_csv(&entries));
    Ok(())
}
