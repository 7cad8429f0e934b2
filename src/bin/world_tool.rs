use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use shardkeep::config::PersistConfig;
use shardkeep::content;
use shardkeep::persistence::{decode_world, WorldFile};

const USAGE: &str = "Usage: world_tool [--conf FILE] inspect|verify [PATH]";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stderr()))
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut conf_file: Option<String> = None;
    let mut command: Option<String> = None;
    let mut path: Option<PathBuf> = None;

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "--h" | "--?" | "/?" => {
                println!("{}", USAGE);
                return Ok(());
            }
            "--conf" => {
                if i + 1 < args.len() {
                    i += 1;
                    conf_file = Some(args[i].clone());
                } else {
                    eprintln!("Error: --conf requires a FILE argument");
                    return Ok(());
                }
            }
            arg if command.is_none() => command = Some(arg.to_string()),
            arg if path.is_none() => path = Some(PathBuf::from(arg)),
            arg => {
                eprintln!("Error: unexpected argument {}", arg);
                return Ok(());
            }
        }
        i += 1;
    }

    let config = match &conf_file {
        Some(file) => PersistConfig::from_file(file)
            .with_context(|| format!("Cannot load config: {}", file))?,
        None => PersistConfig::default(),
    };
    let path = path.unwrap_or_else(|| config.world_path());

    match command.as_deref() {
        Some("inspect") => inspect(&path),
        Some("verify") => verify(&path, &config),
        _ => {
            eprintln!("{}", USAGE);
            Ok(())
        }
    }
}

fn inspect(path: &Path) -> Result<()> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Cannot read world file: {}", path.display()))?;
    let file = WorldFile::parse(&bytes)
        .with_context(|| format!("Cannot parse world file: {}", path.display()))?;

    println!("file:       {}", path.display());
    println!("format:     v{}", file.header.format_version);
    println!("saved at:   {}", file.header.saved_at);
    println!("compressed: {}", file.header.compressed());
    println!("body:       {} bytes", file.header.body_len);
    println!("checksum:   {}", hex::encode(file.header.checksum));
    println!("objects:    {}", file.entries.len());

    let mut per_type: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for entry in &file.entries {
        let name = file.type_name(entry).unwrap_or("?");
        let slot = per_type.entry(name).or_default();
        slot.0 += 1;
        slot.1 += entry.length as usize;
    }
    for (name, (count, size)) in per_type {
        println!("  {:<20} {:>8} objects {:>10} bytes", name, count, size);
    }
    Ok(())
}

fn verify(path: &Path, config: &PersistConfig) -> Result<()> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Cannot read world file: {}", path.display()))?;
    let registry = content::registry();
    let (world, report) = decode_world(&bytes, &registry, &config.load_options(), Utc::now())
        .with_context(|| format!("Cannot load world file: {}", path.display()))?;

    println!("loaded:      {}", report.loaded);
    println!("live:        {}", world.len());
    println!("validations: {}", report.validations_run);
    println!("dangling:    {}", report.dangling_dropped);
    println!("skipped:     {}", report.skipped.len());
    for skipped in &report.skipped {
        println!("  {} {}: {}", skipped.type_name, skipped.serial, skipped.reason);
    }

    anyhow::ensure!(
        report.skipped.is_empty(),
        "{} objects failed to load",
        report.skipped.len()
    );
    Ok(())
}
