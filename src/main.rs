use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use dicom_volume_export::{
    ConvertOptions, DicomSliceDecoder, SortBy, VolumeLoader, convert_with,
    quantize::{QuantizeConfig, quantize},
};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "dicom-volume-export")]
#[command(about = "Convert a DICOM series into a normalized volume file")]
#[command(version)]
#[command(args_conflicts_with_subcommands = true, subcommand_negates_reqs = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    // Without a subcommand the series is converted.
    #[command(flatten)]
    convert: ConvertArgs,
}

#[derive(Args)]
struct ConvertArgs {
    /// Any file inside the series directory.
    #[arg(long, required = true)]
    dropped_file: Option<PathBuf>,

    /// Where to write the volume.
    #[arg(long, default_value = "temp/initial_volume.txt")]
    output: PathBuf,

    /// How slices are ordered along the depth axis.
    #[arg(long, value_enum, default_value_t = SortArg::FileName)]
    sort_by: SortArg,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert the series containing a file into a volume file.
    Convert(ConvertArgs),
    /// Quantize a grayscale image into K intensity levels.
    Quantize {
        /// Path to the input image.
        #[arg(long)]
        image: PathBuf,

        /// Path to write the quantized image.
        #[arg(long)]
        out: PathBuf,

        /// Number of clusters.
        #[arg(short, default_value = "2")]
        k: usize,

        /// RNG seed for the random initial centers.
        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SortArg {
    FileName,
    SlicePosition,
}

impl From<SortArg> for SortBy {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::FileName => SortBy::FileName,
            SortArg::SlicePosition => SortBy::SlicePosition,
        }
    }
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Convert(args)) => run_convert(args),
        Some(Commands::Quantize {
            image,
            out,
            k,
            seed,
        }) => run_quantize(&image, &out, k, seed),
        None => run_convert(cli.convert),
    }
}

fn run_convert(args: ConvertArgs) -> CliResult<()> {
    let dropped_file = args.dropped_file.ok_or("--dropped-file is required")?;
    let directory = VolumeLoader::directory_of(&dropped_file);
    tracing::info!("Converting series in {}", directory.display());

    let options = ConvertOptions {
        sort_by: args.sort_by.into(),
        ..ConvertOptions::default()
    };
    let volume = convert_with(&directory, &DicomSliceDecoder, &options)?;
    volume.save(&args.output)?;
    Ok(())
}

fn run_quantize(image_path: &Path, out_path: &Path, k: usize, seed: u64) -> CliResult<()> {
    tracing::info!("Loading image: {}", image_path.display());

    let img = image::open(image_path).map_err(|e| -> CliError {
        format!("Failed to open image {}: {}", image_path.display(), e).into()
    })?;
    let gray = img.to_luma8();
    let (w, h) = gray.dimensions();
    let pixels = ndarray::Array2::from_shape_fn((h as usize, w as usize), |(y, x)| {
        f32::from(gray.get_pixel(x as u32, y as u32)[0])
    });

    let config = QuantizeConfig {
        clusters: k,
        seed,
        ..QuantizeConfig::default()
    };
    let quantized = quantize(pixels.view(), &config)?;
    tracing::info!("Cluster centers: {:?}", quantized.centers);

    let out = image::GrayImage::from_fn(w, h, |x, y| {
        let value = quantized.image[[y as usize, x as usize]];
        image::Luma([value.round().clamp(0.0, 255.0) as u8])
    });
    out.save(out_path)?;
    tracing::info!("Quantized image written to {}", out_path.display());
    Ok(())
}
