use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::{import::ConflictPolicy, source::MemberState};

#[derive(Debug, Parser)]
#[command(author, version, about = "Load membership CSV exports into SQLite and resolve member names", long_about = None)]
pub struct Cli {
    /// YAML settings file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// SQLite database file (overrides the settings file)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,
    /// Key for an encrypted (SQLCipher) database
    #[arg(long, global = true)]
    pub key: Option<String>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Import a CSV export into a table, inferring column types
    Import(ImportArgs),
    /// Import a member export into the typed members table
    Members(MembersArgs),
    /// Resolve a free-text name to a stored member
    Resolve(ResolveArgs),
    /// Print the first rows of a table
    Show(ShowArgs),
    /// Print the export download URLs for an organisation
    Urls(UrlsArgs),
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Input CSV file
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Destination table (defaults to the payments table from the settings file)
    #[arg(short = 't', long = "table")]
    pub table: Option<String>,
    /// Primary key column (defaults to the first column)
    #[arg(long = "pk")]
    pub primary_key: Option<String>,
    /// Append into the existing table instead of replacing it
    #[arg(long)]
    pub merge: bool,
    /// Rows sampled for type inference (0 means the whole file)
    #[arg(long)]
    pub sample_rows: Option<usize>,
    /// Character encoding of the input file
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Behaviour when a row collides with an existing key
    #[arg(long, value_enum)]
    pub conflict: Option<ConflictPolicy>,
    /// YAML column map to use instead of inferring one
    #[arg(long)]
    pub schema: Option<PathBuf>,
    /// Write the column map used for this import to a YAML file
    #[arg(long = "save-schema")]
    pub save_schema: Option<PathBuf>,
    /// Print the import report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct MembersArgs {
    /// Member export CSV file
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Members table (overrides the settings file)
    #[arg(short = 't', long = "table")]
    pub table: Option<String>,
    /// Character encoding of the input file
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct ResolveArgs {
    /// Name to resolve, e.g. "Dr Jane Smith"
    #[arg(required = true, num_args = 1..)]
    pub name: Vec<String>,
    /// Fail instead of printing "no match", and skip fuzzy matching
    #[arg(long)]
    pub strict: bool,
    /// Print the member number instead of the name
    #[arg(long)]
    pub number: bool,
    /// Members table (overrides the settings file)
    #[arg(short = 't', long = "table")]
    pub table: Option<String>,
    /// Minimum similarity for fuzzy matches (0.0 - 1.0)
    #[arg(long)]
    pub fuzzy_cutoff: Option<f32>,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    /// Table to print
    #[arg(short = 't', long = "table")]
    pub table: String,
    /// Number of rows to print
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

#[derive(Debug, Args)]
pub struct UrlsArgs {
    /// Organisation shortname (overrides the settings file)
    #[arg(long)]
    pub shortname: Option<String>,
    /// Alternative site root, e.g. for a test server
    #[arg(long)]
    pub base_url: Option<String>,
    /// Member list to link to
    #[arg(long, value_enum, default_value_t = MemberState::Active)]
    pub state: MemberState,
}
