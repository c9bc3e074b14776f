//! sysex-map: convert the parameter address tables of a MIDI implementation
//! chart PDF into a JSON address map.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use pdf_sysex_map::{convert_pdf, MapConfig};

#[derive(Parser, Debug)]
#[command(name = "sysex-map")]
#[command(version, about = "Convert MIDI implementation chart PDFs into JSON sysex address maps", long_about = None)]
struct Args {
    /// Input PDF file
    pdf: PathBuf,

    /// Output JSON file (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Top-level key of the emitted document
    #[arg(short, long)]
    model: Option<String>,

    /// TOML file overriding the layout thresholds and header vocabulary
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Ignore everything before the first row containing this text
    #[arg(long)]
    section: Option<String>,

    /// Emit compact JSON instead of indented
    #[arg(long)]
    compact: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn load_config(args: &Args) -> Result<MapConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            MapConfig::from_toml_str(&text)
                .with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => MapConfig::default(),
    };
    if let Some(model) = &args.model {
        config.model_name = model.clone();
    }
    if let Some(section) = &args.section {
        config.section_marker = Some(section.clone());
    }
    if args.compact {
        config.output_pretty = false;
    }
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .target(env_logger::Target::Stderr)
        .init();

    let config = load_config(&args)?;
    let conversion = convert_pdf(&args.pdf, &config)
        .with_context(|| format!("Failed to convert {}", args.pdf.display()))?;

    let json = conversion
        .to_json(config.output_pretty)
        .context("Failed to serialize address map")?;

    // Output is written only once the whole document converted.
    match &args.output {
        Some(path) => {
            fs::write(path, json.as_bytes())
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("wrote {}", path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(json.as_bytes())?;
            stdout.write_all(b"\n")?;
        }
    }

    info!(
        "{} records from {} pages ({} skipped), {} tables; {}",
        conversion.stats.records,
        conversion.stats.pages,
        conversion.stats.pages_skipped,
        conversion.stats.tables,
        conversion.diagnostics.summary()
    );
    Ok(())
}
