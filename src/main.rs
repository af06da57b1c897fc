use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use lightshow::app::{self, RunOptions};
use lightshow::config::Config;

#[derive(Parser, Debug)]
#[command(name = "lightshow", version, about = "Beat-synchronised light show controller")]
struct Args {
    /// Run against the terminal: keyboard buttons, lamp row on stdout
    #[arg(long, env = "LIGHTSHOW_SIMULATE")]
    simulate: bool,

    /// Directory holding <song>.json timing documents and playlist.json
    #[arg(long, env = "LIGHTSHOW_SONGS_DIR")]
    songs_dir: Option<PathBuf>,

    #[arg(long, default_value = "config.json")]
    config: PathBuf,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lightshow=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config);
    let songs_dir = args
        .songs_dir
        .or_else(|| config.songs_dir.clone())
        .unwrap_or_else(|| PathBuf::from("songs"));

    app::run(&config, &RunOptions { simulate: args.simulate, songs_dir })
}
