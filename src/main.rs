use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use ctxweave::model::Program;
use ctxweave::{pretty, Config, EngineError};

#[derive(Parser)]
#[command(name = "ctxweave", version, about = "Whole-program context-parameter propagation")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long)]
    config: PathBuf,

    /// Path to the JSON program bundle produced by the loader
    #[arg(long)]
    program: PathBuf,

    /// Path for the JSON file collecting warnings and excluded packages
    #[arg(long)]
    debug: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), EngineError> {
    let config = Config::from_file(&cli.config)?;

    let bundle = std::fs::read_to_string(&cli.program)
        .map_err(|e| EngineError::io(cli.program.clone(), e))?;
    let program: Program = serde_json::from_str(&bundle)
        .map_err(|e| EngineError::config(format!("malformed program bundle: {e}")))?;

    let outcome = ctxweave::propagate(&program, &config)?;

    // rewritten files land next to their originals with a ".mod" suffix
    for file in &outcome.files {
        let pkg_name = &program.pkg(file.ast.pkg).name;
        let text = pretty::print_file(&file.ast, pkg_name);
        let out_path = format!("{}.mod", file.path);
        std::fs::write(&out_path, text).map_err(|e| EngineError::io(out_path.clone(), e))?;
        tracing::debug!(path = %out_path, "wrote rewritten file");
    }

    match &cli.debug {
        Some(path) => {
            std::fs::write(path, outcome.report.to_json())
                .map_err(|e| EngineError::io(path.clone(), e))?;
        }
        None => {
            let summary = outcome.report.summary();
            if !summary.is_empty() {
                print!("{summary}");
            }
        }
    }
    Ok(())
}
