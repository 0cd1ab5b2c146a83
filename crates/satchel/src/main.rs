use std::path::PathBuf;

use clap::Parser;
use tracing::error;
use tracing::info;

use satchel::Bundler;
use satchel::BundlerInit;
use satchel_core::types::BundlerOptions;
use satchel_core::types::Target;

#[derive(Parser)]
#[command(name = "satchel", about = "Incremental multi-asset application bundler")]
struct Args {
  /// Entry source file
  entry: PathBuf,

  /// Build once with production defaults
  #[arg(long)]
  production: bool,

  /// Rebuild on file changes
  #[arg(short, long)]
  watch: bool,

  /// Serve the output directory and rebuild on change
  #[arg(short, long)]
  serve: bool,

  /// Port for the development server
  #[arg(short, long, default_value_t = 1234)]
  port: u16,

  /// Output directory
  #[arg(short, long, default_value = "dist")]
  out_dir: PathBuf,

  /// Output filename for the entry bundle
  #[arg(long)]
  out_file: Option<String>,

  /// Disable the compile cache
  #[arg(long)]
  no_cache: bool,

  /// Target platform
  #[arg(long, value_parser = parse_target)]
  target: Option<Target>,

  /// Port for the live-reload server (0 picks one)
  #[arg(long, default_value_t = 0)]
  hmr_port: u16,
}

fn parse_target(value: &str) -> Result<Target, String> {
  match value {
    "browser" => Ok(Target::Browser),
    "node" => Ok(Target::Node),
    "electron" => Ok(Target::Electron),
    other => Err(format!("unknown target '{other}'")),
  }
}

fn main() {
  initialize_tracing();

  let args = Args::parse();
  let runtime = tokio::runtime::Builder::new_multi_thread()
    .enable_all()
    .build()
    .expect("Failed to build tokio runtime");

  if let Err(err) = runtime.block_on(run(args)) {
    error!("{err:#}");
    std::process::exit(1);
  }
}

async fn run(args: Args) -> anyhow::Result<()> {
  let watch = args.watch || args.serve;
  let options = BundlerOptions {
    production: Some(args.production),
    watch: Some(watch),
    out_dir: Some(args.out_dir.clone()),
    out_file: args.out_file.clone(),
    cache: Some(!args.no_cache),
    target: args.target,
    hmr_port: Some(args.hmr_port),
    ..BundlerOptions::default()
  };

  let bundler = Bundler::new(args.entry, options, BundlerInit::default())?;

  if args.serve {
    let port = bundler.serve(args.port, false).await?;
    info!("Server running at http://localhost:{port}");
  }

  bundler.bundle().await?;
  info!("Built to {}", args.out_dir.display());

  if watch {
    info!("Watching for changes...");
    tokio::signal::ctrl_c().await?;
    bundler.stop();
  }

  Ok(())
}

fn initialize_tracing() {
  if std::env::var("RUST_LOG").is_err() {
    std::env::set_var("RUST_LOG", "info");
  }
  tracing_subscriber::fmt::init();
}
