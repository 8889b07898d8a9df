//! Gateway daemon entry point

use clap::Parser;
use op25_gateway::app::GatewayApp;
use op25_gateway::config::{Config, LogConfig};

#[derive(Parser, Debug)]
#[command(
    name = "op25-gateway",
    version,
    about = "OP25 to DVMProject FNE voice traffic gateway"
)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long = "config", value_name = "FILE", default_value = "config.yml")]
    config: String,

    /// Extra arguments are accepted and ignored
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, hide = true)]
    #[allow(dead_code)]
    ignored: Vec<String>,
}

/// Initialize the global log sink from configuration
///
/// An unusable log file falls back to stderr rather than aborting startup.
fn init_logging(config: &LogConfig) {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.level.clone()),
    );

    if !config.file.is_empty() {
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.file)
        {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => {
                eprintln!("Cannot open log file {}: {}; logging to stderr", config.file, e);
            }
        }
    }

    builder.init();
}

fn main() {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}; using default configuration", e);
            Config::default()
        }
    };

    init_logging(&config.log);

    log::info!(
        "OP25 Gateway v{} starting (config: {})",
        env!("CARGO_PKG_VERSION"),
        args.config
    );

    let mut app = GatewayApp::new(&config);
    if let Err(e) = app.run() {
        eprintln!("Fatal: {}", e);
        std::process::exit(1);
    }
}
