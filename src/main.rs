use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use mdict_container::{FileType, MdictReader, Mdd, Mdx, Passcode, ReaderOptions};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mdict-dump", about = "Inspect MDict .mdx/.mdd containers")]
struct Cli {
    /// Path to the .mdx or .mdd file
    path: PathBuf,
    /// Override the text encoding declared in the header (MDX only)
    #[arg(short, long)]
    encoding: Option<String>,
    /// Registration code and user id, as <REG_CODE_HEX>,<USER_ID>
    #[arg(short, long)]
    passcode: Option<String>,
    /// Expand stylesheet markers in definitions
    #[arg(long)]
    substyle: bool,
    /// Number of entries to print
    #[arg(short = 'n', long, default_value = "10")]
    list: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let mut options = ReaderOptions::new().with_stylesheet_substitution(cli.substyle);
    if let Some(encoding) = &cli.encoding {
        options = options.with_encoding(encoding);
    }
    if let Some(raw) = &cli.passcode {
        let Some((reg_code, user_id)) = raw.split_once(',') else {
            bail!("invalid passcode format, expected <REG_CODE_HEX>,<USER_ID>");
        };
        options = options.with_passcode(Passcode::from_hex(reg_code, user_id)?);
    }

    let is_resource = cli
        .path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("mdd"));
    if is_resource {
        dump::<Mdd>(&cli.path, options, cli.list, |key, data| {
            println!("  {} ({} bytes) -> {}", key, data.len(), key.to_relative_path().display())
        })
    } else {
        dump::<Mdx>(&cli.path, options, cli.list, |key, definition| {
            let preview: String = definition.chars().take(80).collect();
            println!("  {key}: {preview}")
        })
    }
}

fn dump<T: FileType + std::fmt::Debug>(
    path: &Path,
    options: ReaderOptions,
    limit: usize,
    print: impl Fn(&T::Key, &T::Record),
) -> Result<()> {
    let reader = MdictReader::<T>::new(path, options).with_context(|| format!("failed to open {}", path.display()))?;
    let header = reader.header();

    println!("{} ({})", path.display(), T::DEBUG_NAME);
    println!("  Engine version: {}", header.engine_version());
    println!("  Encoding: {}", header.encoding.name());
    println!("  Encrypted: {:#04x}", header.encryption.bits());
    if reader.recovered_by_scan() {
        println!("  Key list recovered by scanning");
    }
    let mut attributes: Vec<_> = header.attributes.iter().collect();
    attributes.sort();
    for (name, value) in attributes {
        if name != "StyleSheet" {
            println!("  {name} = {value}");
        }
    }
    println!("  Entries: {}", reader.entry_count());

    println!("\nFirst {limit} entries:");
    for entry in reader.iter_entries().take(limit) {
        let (key, record) = entry?;
        print(&key, &record);
    }
    Ok(())
}
