//! Verstamp CLI entry point.
//!
//! Provides `show` to print a binary's version resource and `stamp` to
//! replace it.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use verstamp::{read_version_info, stamp, VersionRecord, CODE_PAGE_UNICODE, LANG_EN_US};

/// Verstamp: writes VERSIONINFO resources into PE binaries.
#[derive(Parser)]
#[command(name = "verstamp", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Print the version resource of a binary.
    Show {
        /// Path to the PE image.
        file: PathBuf,
    },
    /// Replace the version resource of a binary.
    Stamp {
        /// Path to the PE image.
        file: PathBuf,
        /// File and product version, `a.b.c.d`.
        #[arg(long)]
        version: String,
        /// Product version if it differs from `--version`.
        #[arg(long)]
        product_version: Option<String>,
        /// `CompanyName` string.
        #[arg(long, default_value = "")]
        company: String,
        /// `FileDescription` string.
        #[arg(long, default_value = "")]
        description: String,
        /// `ProductName` string.
        #[arg(long, default_value = "")]
        product: String,
        /// `LegalCopyright` string.
        #[arg(long, default_value = "")]
        copyright: String,
        /// `InternalName` string; defaults to the file stem.
        #[arg(long)]
        internal_name: Option<String>,
        /// `OriginalFilename` string; defaults to the file name.
        #[arg(long)]
        original_filename: Option<String>,
        /// Language ID of the string table.
        #[arg(long, default_value_t = LANG_EN_US)]
        language: u16,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse().command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Show { file } => {
            let Some(info) = read_version_info(&file)? else {
                println!("{}: no version resource", file.display());
                return Ok(());
            };
            println!("FileVersion (fixed):    {}", info.fixed.file_version);
            println!("ProductVersion (fixed): {}", info.fixed.product_version);
            for table in &info.string_tables {
                println!("[{}]", table.key());
                for (key, value) in &table.entries {
                    println!("  {key} = {value}");
                }
            }
            for (lang, code_page) in &info.translations {
                println!("Translation: {lang:#06x} {code_page}");
            }
            Ok(())
        }
        Command::Stamp {
            file,
            version,
            product_version,
            company,
            description,
            product,
            copyright,
            internal_name,
            original_filename,
            language,
        } => {
            let stem = file
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let name = file
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let record = VersionRecord {
                product_version: product_version.unwrap_or_else(|| version.clone()),
                file_version: version,
                company_name: company,
                file_description: description,
                internal_name: internal_name.unwrap_or(stem),
                legal_copyright: copyright,
                original_filename: original_filename.unwrap_or(name),
                product_name: product,
                language_id: language,
                code_page: CODE_PAGE_UNICODE,
            };
            stamp(&file, &record)?;
            println!("stamped {} with {}", file.display(), record.file_version);
            Ok(())
        }
    }
}
