//! Builds a visual vocabulary from a directory of training images.
//!
//! Descriptors are accumulated from a randomly shuffled traversal of the
//! corpus, bounded by `--max-images`, then clustered exactly once.

use clap::Parser;
use log::{info, warn};
use rand::seq::SliceRandom;
use rand::thread_rng;
use std::path::PathBuf;
use std::process;

use rivet::{
    config::DetectorParams, corpus, extract, logger, ClusterParams, Detector, KeypointFilter,
    MatStore, RetrievalError, VocabTrainer,
};

#[derive(Parser, Debug)]
#[command(name = "build-vocab", version, about = "Cluster corpus descriptors into a visual vocabulary")]
struct Args {
    /// Directory of training images
    #[arg(short = 'd', long, value_name = "DIR")]
    train_dir: PathBuf,

    /// Vocabulary store file to write
    #[arg(short = 'o', long, default_value = "vocabulary.voc")]
    output: PathBuf,

    /// Record name inside the store
    #[arg(short = 'n', long, default_value = "vocabulary")]
    name: String,

    /// Number of visual words
    #[arg(short = 's', long, default_value_t = 1500)]
    size: usize,

    /// Maximum number of images to accumulate descriptors from
    #[arg(long, default_value_t = 500)]
    max_images: usize,

    /// Detector parameter file (`key : value` lines)
    #[arg(short = 'p', long, value_name = "FILE")]
    params: Option<PathBuf>,

    /// Independent k-means restarts; the lowest-cost run wins
    #[arg(long, default_value_t = 1)]
    restarts: usize,

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
    corpus::check_dir(&args.train_dir)?;

    info!("Starting build-vocab.");
    info!("Training directory: {}", args.train_dir.display());
    info!("Vocabulary size: {}", args.size);
    info!(
        "Detector: threshold {} / {} octaves / {} layers",
        params.threshold, params.octaves, params.layers
    );

    let detector = Detector::new(params.clone());
    let filter = KeypointFilter::from(&params);
    let mut trainer = VocabTrainer::with_params(
        args.size,
        ClusterParams {
            restarts: args.restarts,
            ..ClusterParams::default()
        },
    );

    // shuffle so the accumulated sample carries no lexicographic bias
    let mut files = corpus::list_images(&args.train_dir)?;
    files.shuffle(&mut thread_rng());

    let mut processed = 0usize;
    for path in &files {
        if processed >= args.max_images {
            break;
        }
        let image = match extract::load_grayscale(path) {
            Ok(image) => image,
            Err(err) => {
                warn!("could not read {}: {}", path.display(), err);
                continue;
            }
        };
        let features = filter.apply(&detector.detect(&image));
        if features.is_empty() {
            warn!("{} contains no keypoints", path.display());
        } else {
            trainer.add(&features.descriptors);
        }
        processed += 1;
    }

    info!(
        "Clustering {} descriptors from {} images.",
        trainer.count(),
        processed
    );
    let vocabulary = match trainer.cluster() {
        Ok(vocabulary) => vocabulary,
        Err(err @ RetrievalError::InsufficientData { .. }) => {
            logger::failure("not enough descriptors; no vocabulary written");
            return Err(err);
        }
        Err(err) => return Err(err),
    };

    let store = MatStore::new(&args.output);
    vocabulary.save(&store, &args.name)?;
    logger::success(&format!(
        "vocabulary of {} words saved to {} as `{}`",
        vocabulary.len(),
        args.output.display(),
        args.name
    ));
    Ok(())
}
