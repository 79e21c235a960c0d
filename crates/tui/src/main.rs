mod renderer;

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use ratioflame_core::source::{DirSource, ProfileSource};
use ratioflame_core::state::{MemoryLink, ShareTarget};
use ratioflame_core::svg::render_svg;
use ratioflame_core::{Transition, Viewer, ViewerConfig};
use ratioflame_protocol::Viewport;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Flamegraphs colored by the ratio of two hardware counters.
#[derive(Parser, Debug)]
#[command(name = "ratioflame", version)]
struct Args {
    /// Directory holding `<key>.json` profile trees
    #[arg(short, long, default_value = ".")]
    data_dir: PathBuf,

    /// Share string to start from, e.g. `#profile=ld2&metric=instructions&threshold=1.50`
    #[arg(short, long, default_value = "")]
    state: String,

    /// Viewer configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the view as SVG to this path instead of opening the terminal UI
    #[arg(long)]
    svg: Option<PathBuf>,

    /// SVG width in pixels
    #[arg(long, default_value_t = 1200.0)]
    width: f64,

    /// Log file. Without it, logs go to stderr when exporting and are
    /// dropped in the terminal UI.
    #[arg(long)]
    log: Option<PathBuf>,
}

fn init_logging(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    match &args.log {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("creating log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None if args.svg.is_some() => builder.with_writer(std::io::stderr).init(),
        // The alternate screen owns the terminal.
        None => {}
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    let config = match &args.config {
        Some(path) => ViewerConfig::from_path(path)?,
        None => ViewerConfig::default(),
    };
    let source = DirSource::new(&args.data_dir);
    let mut link = MemoryLink::new(args.state.clone());
    let mut viewer = Viewer::new(config);

    let mut startup = viewer.run(
        Transition::LoadFromSharedState(args.state.clone()),
        &source,
        &mut link,
    );
    if startup.is_ok() && viewer.state().file_key.is_empty() {
        // No profile named anywhere: open the first one on offer.
        if let Some(first) = source.keys()?.into_iter().next() {
            startup = viewer.run(Transition::SelectFile(first), &source, &mut link);
        }
    }

    if let Some(path) = &args.svg {
        startup?;
        let commands = viewer.paint(&Viewport::sized(args.width, f64::INFINITY));
        let svg = render_svg(&commands, args.width, viewer.layout_height());
        std::fs::write(path, svg).with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "wrote svg");
    } else {
        let status = startup.err().map(|e| e.to_string());
        renderer::run(&mut viewer, &source, &mut link, status)?;
    }

    writeln!(std::io::stdout(), "{}", link.current())?;
    Ok(())
}
