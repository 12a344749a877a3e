//! Compares two images: histogram distance against a shared vocabulary
//! plus the verified inlier count and fundamental matrix.

use clap::Parser;
use log::info;
use std::path::{Path, PathBuf};
use std::process;

use rivet::verify::VerifierParams;
use rivet::{
    config::DetectorParams, extract, logger, rank, Detector, Features, HistogramExt,
    KeypointFilter, MatStore, MatchVerifier, Vocabulary, WeightMode,
};

#[derive(Parser, Debug)]
#[command(name = "compare-images", version, about = "Compare two images by histogram and verified matches")]
struct Args {
    /// First image
    #[arg(long = "i1", value_name = "FILE")]
    image1: PathBuf,

    /// Second image
    #[arg(long = "i2", value_name = "FILE")]
    image2: PathBuf,

    /// Vocabulary store file
    #[arg(short = 'v', long, value_name = "FILE")]
    vocab: PathBuf,

    /// Record name inside the store
    #[arg(short = 'n', long, default_value = "vocabulary")]
    name: String,

    /// Detector parameter file (`key : value` lines)
    #[arg(short = 'p', long, value_name = "FILE")]
    params: Option<PathBuf>,

    /// Nearest-neighbor distance ratio threshold
    #[arg(short = 'r', long, default_value_t = 0.8)]
    ratio: f32,

    /// Side-by-side keypoint montage output file
    #[arg(short = 'o', long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Run without console output
    #[arg(long)]
    background: bool,

    /// Append events to a dated log file in this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();
    logger::init(!args.background, args.log_dir.clone()).ok();
    if let Err(err) = run(&args) {
        log::error!("{}", err);
        log::error!("Operation aborted.");
        process::exit(1);
    }
}

fn extract_one(detector: &Detector, filter: &KeypointFilter, path: &Path) -> rivet::Result<Features> {
    let image = extract::load_grayscale(path)?;
    let features = filter.apply(&detector.detect(&image));
    info!(
        "{}: {} keypoints after filtering.",
        path.display(),
        features.len()
    );
    Ok(features)
}

fn run(args: &Args) -> rivet::Result<()> {
    let params = match &args.params {
        Some(path) => DetectorParams::from_file(path)?,
        None => DetectorParams::default(),
    };
    let store = MatStore::new(&args.vocab);
    let vocabulary = Vocabulary::load(&store, &args.name)?;
    info!(
        "Loaded vocabulary `{}` with {} words.",
        args.name,
        vocabulary.len()
    );

    let detector = Detector::new(params.clone());
    let filter = KeypointFilter::from(&params);
    let features1 = extract_one(&detector, &filter, &args.image1)?;
    let features2 = extract_one(&detector, &filter, &args.image2)?;

    let hist1 = vocabulary.encode(&features1.descriptors, WeightMode::ScaledByCount);
    let hist2 = vocabulary.encode(&features2.descriptors, WeightMode::ScaledByCount);
    info!(
        "Histogram distance between the two images: {:.4}",
        hist1.l2_distance(&hist2)
    );
    let norm1 = vocabulary.encode(&features1.descriptors, WeightMode::Normalized);
    let norm2 = vocabulary.encode(&features2.descriptors, WeightMode::Normalized);
    info!(
        "Histogram similarity (L1): {:.4}",
        norm1.l1_similarity(&norm2)
    );

    let verifier = MatchVerifier::new(VerifierParams {
        ratio: args.ratio,
        ..VerifierParams::default()
    });
    let verification = verifier.verify(&features1, &features2);
    info!("Verified inliers: {}", verification.score());
    if let Some(f) = verification.fundamental {
        for i in 0..3 {
            info!(
                "F[{}] = [{:10.6} {:10.6} {:10.6}]",
                i,
                f[(i, 0)],
                f[(i, 1)],
                f[(i, 2)]
            );
        }
    } else {
        info!("No fundamental matrix: the images do not match.");
    }

    if let Some(output) = &args.output {
        let mut panel1 = rank::load_rgb(&args.image1)?;
        let mut panel2 = rank::load_rgb(&args.image2)?;
        rank::draw_keypoints(&mut panel1, &features1.keypoints);
        rank::draw_keypoints(&mut panel2, &features2.keypoints);
        let combined = rank::montage(&[panel1, panel2]);
        combined.save(output).map_err(rivet::RetrievalError::Image)?;
        logger::success(&format!("montage saved to {}", output.display()));
    }

    Ok(())
}
