use clap::Parser;
use ipa_repack::{
    repack, resolve_output, RepackConfig, RepackError, RepackOptions, Result, SymbolMapping, Toolchain,
};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ipa-repack")]
#[command(about = "Restore symbols in, re-entitle and re-sign the executables of an .ipa")]
#[command(version)]
struct Cli {
    /// The .ipa to repack
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output .ipa (defaults to <input>_repacked_<timestamp>.ipa)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// The restore-symbol executable (defaults to the one on PATH)
    #[arg(short = 'r', long)]
    restore_symbol: Option<PathBuf>,

    /// The codesign executable (defaults to the one on PATH)
    #[arg(long)]
    codesign: Option<PathBuf>,

    /// An executable inside the .app and its symbol file, as EXECUTABLE=SYMBOLS.
    /// May be repeated.
    #[arg(short = 's', long = "symbols", value_name = "EXECUTABLE=SYMBOLS", value_parser = parse_mapping)]
    symbols: Vec<SymbolMapping>,

    /// Don't add get-task-allow, task_for_pid-allow and run-unsigned-code
    #[arg(long)]
    no_debuggable: bool,

    /// Keep the working directory after repacking
    #[arg(short = 'k', long)]
    keep_workdir: bool,

    /// Overwrite an existing output without confirming
    #[arg(long)]
    overwrite: bool,

    /// The compression level of the ipa (0-9, defaults to 6)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u32).range(0..=9))]
    compress: Option<u32>,

    /// A JSON file with default values for the options above
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print every external command before running it
    #[arg(short, long)]
    verbose: bool,
}

fn parse_mapping(s: &str) -> std::result::Result<SymbolMapping, String> {
    s.parse().map_err(|e: RepackError| e.to_string())
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();

    if let Err(e) = run(cli) {
        println!("[!] {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match cli.config {
        Some(ref path) => RepackConfig::load(path)?,
        None => RepackConfig::default(),
    };

    let mut options = merge(cli, config)?;
    log::debug!("options: {:?}", options);

    let output = resolve_output(&options);
    if output.exists() && !options.overwrite {
        print!("[<] {} already exists. overwrite? [Y/n] ", output.display());
        std::io::stdout().flush()?;

        let mut response = String::new();
        std::io::stdin().read_line(&mut response)?;
        let response = response.trim().to_lowercase();

        if !matches!(response.as_str(), "y" | "yes" | "") {
            println!("[>] quitting.");
            return Ok(());
        }
        options.overwrite = true;
    }
    options.output = Some(output);

    let report = repack(&options)?;
    println!(
        "[*] processed \x1b[96m{}\x1b[0m executable(s)",
        report.executables.len()
    );

    Ok(())
}

/// Command line values win over the config file; symbol mappings from both are kept.
fn merge(cli: Cli, config: RepackConfig) -> Result<RepackOptions> {
    let input = cli
        .input
        .or(config.input)
        .ok_or_else(|| RepackError::InvalidInput("Input is required".to_string()))?;

    let defaults = Toolchain::default();
    let tools = Toolchain {
        restore_symbol: cli
            .restore_symbol
            .or(config.restore_symbol)
            .unwrap_or(defaults.restore_symbol),
        codesign: cli.codesign.or(config.codesign).unwrap_or(defaults.codesign),
    };

    let mut mappings = config.symbols;
    mappings.extend(cli.symbols);

    let compression_level = cli.compress.or(config.compress).unwrap_or(6);
    if compression_level > 9 {
        return Err(RepackError::InvalidInput(format!(
            "compression level must be 0-9, got {}",
            compression_level
        )));
    }

    Ok(RepackOptions {
        input,
        output: cli.output.or(config.output),
        tools,
        mappings,
        debuggable: !cli.no_debuggable && config.debuggable.unwrap_or(true),
        keep_workdir: cli.keep_workdir || config.keep_workdir,
        overwrite: cli.overwrite || config.overwrite,
        compression_level,
    })
}
