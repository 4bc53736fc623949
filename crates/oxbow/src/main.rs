use anyhow::{Context, Result};
use clap::Parser;
use oxbow::{codegen, io, optimizer};
use std::path::PathBuf;

/// oxbow — WebAssembly dead code elimination.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Input module: .wast text, .wasm binary, or anything else sniffed
    /// by content
    input: PathBuf,

    /// Output file (.wasm writes binary, any other suffix writes text);
    /// omitted means text on stdout
    #[arg(long, short)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    eprintln!("oxbow: optimizing {}", cli.input.display());

    let mut module = io::read_module(&cli.input)
        .with_context(|| format!("failed to load {}", cli.input.display()))?;

    optimizer::optimize_module(&mut module).context("dead code elimination failed")?;

    match cli.output {
        Some(output_path) => {
            io::write_module(&module, &output_path)?;
            eprintln!("oxbow: wrote {}", output_path.display());
        }
        None => {
            print!("{}", codegen::print_module(&module));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_defaults() {
        let cli = Cli::parse_from(["oxbow", "input.wasm"]);
        assert_eq!(cli.input, PathBuf::from("input.wasm"));
        assert!(cli.output.is_none());
    }

    #[test]
    fn cli_parses_output_flag() {
        let cli = Cli::parse_from(["oxbow", "in.wast", "-o", "out.wasm"]);
        assert_eq!(cli.output, Some(PathBuf::from("out.wasm")));
    }
}
