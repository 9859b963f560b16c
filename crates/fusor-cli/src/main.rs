//! fusor CLI - drive TSDF fusion sessions from recorded frames.
//!
//! Reads depth map dumps listed in a JSON session config, fuses them
//! into a volume, and persists/renders the result.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fusor_math::Transform;
use fusor_volume::{Frame, Image2, TsdfVolume};
use std::path::{Path, PathBuf};

mod config;

use config::SessionConfig;

#[derive(Parser)]
#[command(name = "fusor")]
#[command(about = "TSDF volume fusion from recorded depth frames", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fuse a recorded session into a volume checkpoint
    Fuse {
        /// Session config (JSON)
        config: PathBuf,
        /// Output checkpoint file
        #[arg(short, long)]
        out: PathBuf,
        /// Run the integration on the GPU (requires the `gpu` feature)
        #[arg(long)]
        gpu: bool,
    },
    /// Ray-cast a checkpoint into a vertex map
    Render {
        /// Input checkpoint file
        checkpoint: PathBuf,
        /// Session config providing the camera intrinsics
        config: PathBuf,
        /// Output vertex map (3-channel binary dump, NaN = miss)
        #[arg(short, long)]
        out: PathBuf,
        /// Index of the config frame whose pose to render from
        /// (defaults to the identity pose)
        #[arg(long)]
        frame: Option<usize>,
    },
    /// Display information about a checkpoint
    Info {
        /// Path to the checkpoint file
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Fuse { config, out, gpu } => fuse(&config, &out, gpu),
        Commands::Render {
            checkpoint,
            config,
            out,
            frame,
        } => render(&checkpoint, &config, &out, frame),
        Commands::Info { file } => show_info(&file),
    }
}

/// Re-quantize a metric depth map to the raw units integration expects.
/// Non-finite and non-positive samples become 0, the invalid marker.
fn quantize_depth(depth_m: &Image2<f32>, depth_scale: f32) -> Image2<u16> {
    let raw = depth_m
        .as_slice()
        .iter()
        .map(|&d| {
            if d.is_finite() && d > 0.0 {
                (d / depth_scale).round().clamp(0.0, u16::MAX as f32) as u16
            } else {
                0
            }
        })
        .collect();
    Image2::from_vec(depth_m.width(), depth_m.height(), raw)
        .expect("quantized buffer has the source dimensions")
}

fn load_frame(session: &SessionConfig, index: usize) -> Result<Frame> {
    let entry = &session.frames[index];
    let file = std::fs::File::open(&entry.depth)
        .with_context(|| format!("opening depth map {}", entry.depth.display()))?;
    let depth_m = fusor_io::read_depth_map(std::io::BufReader::new(file))
        .with_context(|| format!("decoding depth map {}", entry.depth.display()))?;
    // Recorded sessions carry no color; fuse a neutral gray so the
    // color channels stay well-defined.
    let color = Image2::new(depth_m.width(), depth_m.height(), [128u8; 3]);
    let depth = quantize_depth(&depth_m, session.depth_scale);
    Frame::new(color, depth, entry.pose(), session.depth_scale)
        .with_context(|| format!("building frame {index}"))
}

fn fuse(config_path: &Path, out: &Path, gpu: bool) -> Result<()> {
    let session = SessionConfig::load(config_path)?;
    if session.frames.is_empty() {
        bail!("session config lists no frames");
    }

    let snapshot = if gpu {
        fuse_gpu(&session)?
    } else {
        let mut volume = TsdfVolume::new(session.volume.params())?;
        for index in 0..session.frames.len() {
            let frame = load_frame(&session, index)?;
            volume.integrate(&frame, &session.camera)?;
            println!("frame {}/{}: integrated", index + 1, session.frames.len());
        }
        volume.snapshot()
    };

    let file = std::fs::File::create(out)
        .with_context(|| format!("creating checkpoint {}", out.display()))?;
    fusor_io::save_checkpoint(
        std::io::BufWriter::new(file),
        &session.volume.params(),
        &snapshot,
    )?;
    println!("wrote checkpoint {}", out.display());
    Ok(())
}

#[cfg(feature = "gpu")]
fn fuse_gpu(session: &SessionConfig) -> Result<fusor_volume::VolumeSnapshot> {
    use fusor_gpu::{GpuContext, GpuFrame, GpuTsdfVolume};

    let ctx = GpuContext::init_blocking().context("initializing GPU")?;
    let mut volume = GpuTsdfVolume::new(ctx, session.volume.params())?;
    for index in 0..session.frames.len() {
        let frame = load_frame(session, index)?;
        let gpu_frame = GpuFrame::upload(ctx, &frame);
        volume.integrate(ctx, &gpu_frame, &session.camera)?;
        println!(
            "frame {}/{}: integrated (gpu)",
            index + 1,
            session.frames.len()
        );
    }
    Ok(volume.download(ctx)?)
}

#[cfg(not(feature = "gpu"))]
fn fuse_gpu(_session: &SessionConfig) -> Result<fusor_volume::VolumeSnapshot> {
    bail!("this build has no GPU support; rebuild with --features gpu")
}

fn render(
    checkpoint: &Path,
    config_path: &Path,
    out: &Path,
    frame: Option<usize>,
) -> Result<()> {
    let session = SessionConfig::load(config_path)?;
    let pose = match frame {
        Some(index) => session
            .frames
            .get(index)
            .with_context(|| format!("config has no frame {index}"))?
            .pose(),
        None => Transform::identity(),
    };

    let file = std::fs::File::open(checkpoint)
        .with_context(|| format!("opening checkpoint {}", checkpoint.display()))?;
    let (params, snapshot) = fusor_io::load_checkpoint(std::io::BufReader::new(file))?;
    let volume = TsdfVolume::from_parts(params, &snapshot)?;

    let image = volume.raycast(&session.camera, &pose)?;
    println!(
        "{} of {} rays hit the surface",
        image.hit_count(),
        image.width() * image.height()
    );

    let out_file = std::fs::File::create(out)
        .with_context(|| format!("creating vertex map {}", out.display()))?;
    fusor_io::write_vertex_map(std::io::BufWriter::new(out_file), &image.to_vertex_map())?;
    println!("wrote vertex map {}", out.display());
    Ok(())
}

fn show_info(file: &Path) -> Result<()> {
    let reader = std::fs::File::open(file)
        .with_context(|| format!("opening checkpoint {}", file.display()))?;
    let (params, snapshot) = fusor_io::load_checkpoint(std::io::BufReader::new(reader))?;

    let observed = snapshot.weight.iter().filter(|&&w| w > 0).count();
    let near_surface = snapshot
        .tsdf
        .iter()
        .zip(&snapshot.weight)
        .filter(|&(t, &w)| w > 0 && t.abs() < 1.0)
        .count();

    println!("dims:          {:?}", params.dims);
    println!("voxel length:  {} m", params.voxel_length);
    println!("sdf trunc:     {} m", params.sdf_trunc);
    println!("voxels:        {}", params.voxel_count());
    println!("observed:      {observed}");
    println!("in trunc band: {near_surface}");
    Ok(())
}
