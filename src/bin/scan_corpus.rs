//! Ranks a whole corpus of precomputed feature caches against one query
//! image and renders a montage of the best matches.

use clap::Parser;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::process;

use rivet::verify::VerifierParams;
use rivet::{
    config::DetectorParams, corpus, extract, logger, rank, Detector, KeypointFilter, Ranker,
};

#[derive(Parser, Debug)]
#[command(name = "scan-corpus", version, about = "Rank precomputed candidates against a query image")]
struct Args {
    /// Query image
    #[arg(short = 'q', long, value_name = "FILE")]
    query: PathBuf,

    /// Directory of `.feat` feature caches
    #[arg(short = 'f', long, value_name = "DIR")]
    features_dir: PathBuf,

    /// Directory holding the original corpus images (enables the montage)
    #[arg(short = 'i', long, value_name = "DIR")]
    image_dir: Option<PathBuf>,

    /// Montage output file
    #[arg(short = 'o', long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Detector parameter file (`key : value` lines)
    #[arg(short = 'p', long, value_name = "FILE")]
    params: Option<PathBuf>,

    /// Nearest-neighbor distance ratio threshold
    #[arg(short = 'r', long, default_value_t = 0.8)]
    ratio: f32,

    /// Number of top candidates to report and render
    #[arg(short = 't', long, default_value_t = 3)]
    top: usize,

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

fn run(args: &Args) -> rivet::Result<()> {
    let params = match &args.params {
        Some(path) => DetectorParams::from_file(path)?,
        None => DetectorParams::default(),
    };
    corpus::check_dir(&args.features_dir)?;

    let detector = Detector::new(params.clone());
    let filter = KeypointFilter::from(&params);
    let image = extract::load_grayscale(&args.query)?;
    let query = filter.apply(&detector.detect(&image));
    info!(
        "Query {}: {} keypoints after filtering.",
        args.query.display(),
        query.len()
    );

    let ranker = Ranker::new(VerifierParams {
        ratio: args.ratio,
        ..VerifierParams::default()
    });
    let ranking = ranker.rank(&query, &args.features_dir)?;
    info!("Scanned {} candidates.", ranking.len());

    for (place, candidate) in ranking.iter().take(args.top).enumerate() {
        info!(
            "#{}: {} with {} inliers",
            place + 1,
            candidate.path.display(),
            candidate.score
        );
    }

    if let (Some(image_dir), Some(output)) = (&args.image_dir, &args.output) {
        corpus::check_dir(image_dir)?;
        let mut panels = Vec::new();
        let mut query_panel = rank::load_rgb(&args.query)?;
        rank::draw_keypoints(&mut query_panel, &query.keypoints);
        panels.push(query_panel);
        for candidate in ranking.iter().take(args.top) {
            match find_image(image_dir, &candidate.path) {
                Some(path) => match rank::load_rgb(&path) {
                    Ok(panel) => panels.push(panel),
                    Err(err) => warn!("could not read {}: {}", path.display(), err),
                },
                None => warn!(
                    "no corpus image matches {}",
                    candidate.path.display()
                ),
            }
        }
        let combined = rank::montage(&panels);
        combined.save(output).map_err(rivet::RetrievalError::Image)?;
        logger::success(&format!("montage saved to {}", output.display()));
    }

    Ok(())
}

/// Find the corpus image a feature cache was derived from: same stem,
/// any recognized image extension.
fn find_image(image_dir: &Path, cache: &Path) -> Option<PathBuf> {
    let stem = cache.file_stem()?;
    corpus::list_images(image_dir)
        .ok()?
        .into_iter()
        .find(|p| p.file_stem() == Some(stem))
}
