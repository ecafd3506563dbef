pub mod cli;
pub mod config;
pub mod data;
pub mod diff;
pub mod error;
pub mod import;
pub mod io_utils;
pub mod members;
pub mod report;
pub mod resolve;
pub mod schema;
pub mod source;
pub mod store;

use std::{env, path::Path, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    cli::{Cli, Commands},
    config::Settings,
    import::{ImportOptions, ImportReport, TableImporter},
    members::MemberRegistry,
    resolve::IdentityResolver,
    schema::TableSchema,
    source::MojoUrls,
    store::{StorageMode, Store},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("member_ledger", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let mut settings = Settings::load_or_default(cli.config.as_deref())
        .with_context(|| format!("Loading settings from {:?}", cli.config))?;
    if let Some(db) = cli.db {
        settings.database = db;
    }
    let mode = StorageMode::from_key(cli.key);

    match cli.command {
        Commands::Import(args) => handle_import(&open_store(&settings.database, &mode)?, &settings, &args),
        Commands::Members(args) => handle_members(&open_store(&settings.database, &mode)?, &settings, &args),
        Commands::Resolve(args) => handle_resolve(&open_store(&settings.database, &mode)?, &settings, &args),
        Commands::Show(args) => handle_show(&open_store(&settings.database, &mode)?, &args),
        Commands::Urls(args) => handle_urls(&settings, &args),
    }
}

fn open_store(path: &Path, mode: &StorageMode) -> Result<Store> {
    Store::open(path, mode).with_context(|| format!("Opening database {path:?}"))
}

fn handle_import(store: &Store, settings: &Settings, args: &cli::ImportArgs) -> Result<()> {
    let label = args.input_encoding.as_deref().unwrap_or(&settings.encoding);
    let table = args.table.as_deref().unwrap_or(&settings.payments_table);
    let options = ImportOptions {
        primary_key: args.primary_key.clone(),
        sample_size: args.sample_rows.unwrap_or(settings.sample_rows),
        merge: args.merge,
        conflict: args.conflict.unwrap_or(settings.conflict),
        encoding: io_utils::resolve_encoding(Some(label))?,
    };
    info!(
        "{} '{}' into table '{}'",
        if options.merge { "Merging" } else { "Importing" },
        args.input.display(),
        table
    );

    let mut importer = TableImporter::new(store, table);
    if let Some(path) = &args.schema {
        let schema = TableSchema::load(path)
            .with_context(|| format!("Loading column map from {path:?}"))?;
        importer = importer.with_schema(schema);
    }
    let outcome = importer.import_path(&args.input, &options);

    if let (Some(path), Some(schema)) = (&args.save_schema, importer.schema()) {
        schema
            .save(path)
            .with_context(|| format!("Writing column map to {path:?}"))?;
        debug!("Column map for '{table}' written to {path:?}");
    }
    // Rows committed before a partial failure still get reported.
    let summary = match &outcome {
        Ok(summary) => Some(summary),
        Err(err) => err.import_failure().map(|failure| &failure.report),
    };
    if let Some(summary) = summary {
        print_import_report(summary, args.json)?;
    }
    outcome.with_context(|| format!("Importing {:?} into '{table}'", args.input))?;
    Ok(())
}

fn print_import_report(summary: &ImportReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }
    println!("Inserted {} row(s) into '{}'", summary.inserted, summary.table);
    if let Some(diff) = &summary.diff {
        print!("{}", report::render_diff(diff));
    }
    Ok(())
}

fn handle_members(store: &Store, settings: &Settings, args: &cli::MembersArgs) -> Result<()> {
    let label = args.input_encoding.as_deref().unwrap_or(&settings.encoding);
    let encoding = io_utils::resolve_encoding(Some(label))?;
    let table = args.table.as_deref().unwrap_or(&settings.members_table);
    let registry = MemberRegistry::new(store, table);
    let summary = registry
        .import_path(&args.input, encoding)
        .with_context(|| format!("Importing members from {:?}", args.input))?;
    println!(
        "Inserted {} member(s), skipped {}",
        summary.inserted, summary.skipped
    );
    Ok(())
}

fn handle_resolve(store: &Store, settings: &Settings, args: &cli::ResolveArgs) -> Result<()> {
    let name = args.name.join(" ");
    let table = args.table.as_deref().unwrap_or(&settings.members_table);
    let resolver = IdentityResolver::new(store, table)
        .fuzzy_cutoff(args.fuzzy_cutoff.unwrap_or(settings.fuzzy_cutoff));
    let context = || format!("Resolving '{name}' against '{table}'");
    let line = if args.number {
        resolver
            .resolve_number(&name, args.strict)
            .with_context(context)?
            .map(|number| number.to_string())
    } else {
        resolver
            .resolve(&name, args.strict)
            .with_context(context)?
            .map(|(first, last)| format!("{first} {last}"))
    };
    println!("{}", line.as_deref().unwrap_or("no match"));
    Ok(())
}

fn handle_show(store: &Store, args: &cli::ShowArgs) -> Result<()> {
    let records = store
        .preview(&args.table, args.limit)
        .with_context(|| format!("Reading table '{}' from {}", args.table, store.label()))?;
    print!("{}", report::render_records(&records));
    Ok(())
}

fn handle_urls(settings: &Settings, args: &cli::UrlsArgs) -> Result<()> {
    let shortname = args
        .shortname
        .as_deref()
        .or(settings.shortname.as_deref())
        .context("No shortname given; pass --shortname or set it in the settings file")?;
    let urls = match &args.base_url {
        Some(base) => MojoUrls::with_base(base.as_str(), shortname),
        None => MojoUrls::new(shortname),
    };
    println!("login:              {}", urls.login());
    println!("members ({}): {}", args.state, urls.members(args.state));
    println!("completed payments: {}", urls.completed_payments());
    println!("pending approval:   {}", urls.pending_approval());
    println!("pending completion: {}", urls.pending_completion());
    println!("pending payments:   {}", urls.pending_payments());
    Ok(())
}
