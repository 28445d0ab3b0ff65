use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context};
use clap::Parser;

use seqreg::{
    metaimage, ElastixEngine, Sequence, SequenceOptions, SequenceRegistration, Transform, Volume,
};

/// Register every frame of a volume sequence onto a fixed frame using the
/// external elastix engine.
#[derive(Parser, Debug)]
#[command(name = "seqreg", version, about)]
struct Args {
    /// Directory of input .mha volumes, one frame per file, sorted by name
    #[arg(long)]
    input_dir: Option<PathBuf>,

    /// Directory that receives registered volumes and transforms
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Item number of the fixed frame
    #[arg(long, default_value_t = 0)]
    fixed_frame: usize,

    /// Preset index in the preset database
    #[arg(long, default_value_t = 0)]
    preset: usize,

    /// Directory holding presets.json and the parameter files
    #[arg(long, default_value = "presets")]
    presets_dir: PathBuf,

    /// Directory containing the elastix and transformix executables,
    /// bypassing discovery
    #[arg(long)]
    elastix_dir: Option<PathBuf>,

    /// First item of the registered range
    #[arg(long)]
    start: Option<usize>,

    /// Last item of the registered range, inclusive
    #[arg(long)]
    end: Option<usize>,

    /// Also write displacement-field transforms
    #[arg(long)]
    transforms: bool,

    /// Keep per-run temporary directories for debugging
    #[arg(long)]
    keep_temp: bool,

    /// Forward elastix output line by line
    #[arg(long)]
    verbose: bool,

    /// List the available presets and exit
    #[arg(long)]
    list_presets: bool,
}

fn main() -> anyhow::Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "seqreg=info");
    }
    env_logger::init();
    let args = Args::parse();

    let base_dir = std::env::current_dir()?;
    let mut engine = ElastixEngine::from_settings(base_dir, &args.presets_dir);
    if let Some(dir) = &args.elastix_dir {
        engine.set_bin_dir(dir);
    }
    engine.delete_temporary_files = !args.keep_temp;
    engine.log_standard_output = args.verbose;
    engine.set_log_callback(Some(Arc::new(Mutex::new(|line: &str| {
        println!("{line}");
    }))));

    if args.list_presets {
        for (i, preset) in engine.registration_presets()?.iter().enumerate() {
            println!("{i}: {} ({}, {})", preset.id, preset.modality, preset.content);
        }
        return Ok(());
    }

    let Some(input_dir) = &args.input_dir else {
        bail!("--input-dir is required unless --list-presets is given");
    };
    let Some(output_dir) = &args.output_dir else {
        bail!("--output-dir is required unless --list-presets is given");
    };

    let input = load_sequence(input_dir)?;
    if input.is_empty() {
        bail!("no .mha volumes found in {}", input_dir.display());
    }
    log::info!("Loaded {} frames from {}", input.len(), input_dir.display());

    let mut output_volumes = Sequence::new("registered");
    let mut output_transforms = args.transforms.then(|| Sequence::new("transforms"));

    let options = SequenceOptions {
        moving_to_fixed: true,
        start_item: args.start.unwrap_or(0),
        end_item: args.end,
    };
    let mut registration = SequenceRegistration::new(engine);
    registration.register_sequence(
        &input,
        Some(&mut output_volumes),
        output_transforms.as_mut(),
        args.fixed_frame,
        args.preset,
        &options,
        None,
    )?;

    std::fs::create_dir_all(output_dir)?;
    for (value, volume) in output_volumes.iter() {
        let path = output_dir.join(format!("registered_{value}.mha"));
        metaimage::write_volume(volume, &path)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    if let Some(transforms) = &output_transforms {
        for (value, transform) in transforms.iter() {
            match transform {
                Transform::Displacement { field, .. } => {
                    let path = output_dir.join(format!("transform_{value}.mhd"));
                    metaimage::write_displacement_field(field, &path)
                        .with_context(|| format!("writing {}", path.display()))?;
                }
                Transform::Linear(_) => {
                    log::info!("Skipping linear transform for item {value}");
                }
            }
        }
    }
    log::info!("Wrote results to {}", output_dir.display());
    Ok(())
}

/// Read all .mha files of a directory, sorted by file name, as one frame
/// per file. Index values are the running item numbers.
fn load_sequence(dir: &PathBuf) -> anyhow::Result<Sequence<Volume>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|e| e == "mha"))
        .collect();
    paths.sort();

    let mut sequence = Sequence::new("input");
    for (i, path) in paths.iter().enumerate() {
        let volume = metaimage::read_volume(path)
            .with_context(|| format!("reading {}", path.display()))?;
        sequence.push(i.to_string(), volume);
    }
    Ok(sequence)
}
