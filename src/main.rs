use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use eyre::{Result, WrapErr};
use tracing_subscriber::EnvFilter;

use msfs2fg::convert::{ConvertOptions, Converter, TracingObserver};
use msfs2fg::terrain::provider::TerraSyncDir;
use msfs2fg::terrain::TerrainService;

/// Convert MSFS scenery packages (BGL) into FlightGear tile scenery.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Scenery package directory (scanned recursively for .bgl files).
    input: PathBuf,

    /// FlightGear scenery output root.
    output: PathBuf,

    /// Emit glTF tile models.
    #[clap(long)]
    gltf: bool,

    /// Emit AC3D tile models.
    #[clap(long)]
    ac3d: bool,

    /// Local TerraSync directory used to resolve ground elevations for
    /// AGL-relative placements. Without it, elevations are taken as 0.
    #[clap(long)]
    terrain_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Neither flag given means both formats.
    let options = if args.gltf || args.ac3d {
        ConvertOptions {
            emit_gltf: args.gltf,
            emit_ac3d: args.ac3d,
        }
    } else {
        ConvertOptions::default()
    };

    let mut converter = Converter::new(options).with_observer(Arc::new(TracingObserver));
    if let Some(terrain_dir) = args.terrain_dir {
        converter =
            converter.with_terrain(Arc::new(TerrainService::new(TerraSyncDir::new(terrain_dir))));
    }

    let summary = converter
        .convert(&args.input, &args.output)
        .wrap_err("conversion failed")?;

    println!(
        "{} BGL files, {} placements ({} sim objects), {} airports, {} model refs, {} tiles written",
        summary.bgl_files,
        summary.library_placements,
        summary.sim_object_placements,
        summary.airports,
        summary.model_references,
        summary.tiles_written,
    );
    Ok(())
}
