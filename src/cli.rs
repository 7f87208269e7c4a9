//! Command-line interface.

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::Parser;

use crate::error::TranspileError;
use crate::msch::Schematic;
use crate::transpile::transpile;

#[derive(Parser)]
#[command(name = "sfmlog")]
#[command(about = "A mindustry transpiler", long_about = None)]
#[command(version)]
pub struct Cli {
    /// The file to transpile
    #[arg(short, long, value_name = "source_file")]
    pub src: PathBuf,

    /// The file to write the output to
    #[arg(short, long, value_name = "output_file")]
    pub out: Option<PathBuf>,

    /// Copy the output to the clipboard
    #[arg(short, long)]
    pub copy: bool,
}

/// Everything that can end a run: transpile failures carry a traceback,
/// the rest are plain messages.
pub enum CliError {
    Transpile(TranspileError),
    Other(String),
}

impl From<TranspileError> for CliError {
    fn from(error: TranspileError) -> CliError {
        CliError::Transpile(error)
    }
}

/// Entry point for the CLI.
pub fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    let source = std::fs::read_to_string(&cli.src)
        .map_err(|_| CliError::Other(format!("File '{}' not found", cli.src.display())))?;

    let start = Instant::now();
    let schem = transpile(&source, &cli.src)?;
    let elapsed = start.elapsed().as_secs_f64();
    println!(
        "Created schematic '{}' in {:.2} seconds",
        schem.tag("name").unwrap_or(""),
        elapsed
    );

    if cli.copy {
        let text = schem
            .to_base64()
            .map_err(|e| CliError::Other(format!("Failed to serialize schematic: {}", e)))?;
        let mut clipboard = arboard::Clipboard::new()
            .map_err(|e| CliError::Other(format!("Failed to open clipboard: {}", e)))?;
        clipboard
            .set_text(text)
            .map_err(|e| CliError::Other(format!("Failed to write clipboard: {}", e)))?;
    }

    if let Some(out) = &cli.out {
        write_output(&schem, out)?;
    }

    Ok(())
}

/// The output form follows the extension: `.msch` is the binary container,
/// `.mlog`/`.txt` is raw processor code, anything else the base64 text.
fn write_output(schem: &Schematic, out: &Path) -> Result<(), CliError> {
    let extension = out
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match extension.as_str() {
        "msch" => schem
            .write_file(out)
            .map_err(|e| CliError::Other(format!("Failed to write '{}': {}", out.display(), e))),
        "mlog" | "txt" => {
            let codes = schem.processor_codes();
            if codes.is_empty() {
                return Err(CliError::Other(
                    "No processors to write as mlog text".to_string(),
                ));
            }
            std::fs::write(out, codes.join(""))
                .map_err(|e| CliError::Other(format!("Failed to write '{}': {}", out.display(), e)))
        }
        _ => {
            let text = schem
                .to_base64()
                .map_err(|e| CliError::Other(format!("Failed to serialize schematic: {}", e)))?;
            std::fs::write(out, text)
                .map_err(|e| CliError::Other(format!("Failed to write '{}': {}", out.display(), e)))
        }
    }
}
