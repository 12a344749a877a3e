//! Extracts filtered keypoints and descriptors for every image in a
//! directory and caches them as per-image feature files.

use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;
use std::process;

use rivet::store::{feature_path, FeatureFile};
use rivet::{config::DetectorParams, corpus, extract, logger, rank, Detector, KeypointFilter};

#[derive(Parser, Debug)]
#[command(name = "extract-features", version, about = "Cache keypoints and descriptors for a corpus")]
struct Args {
    /// Directory of images to process
    #[arg(short = 'i', long, value_name = "DIR")]
    image_dir: PathBuf,

    /// Directory for the feature cache files (defaults to the image directory)
    #[arg(short = 'o', long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Detector parameter file (`key : value` lines)
    #[arg(short = 'p', long, value_name = "FILE")]
    params: Option<PathBuf>,

    /// Also write keypoint overlay images into this directory
    #[arg(long, value_name = "DIR")]
    keypoint_images: Option<PathBuf>,

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
    corpus::check_dir(&args.image_dir)?;
    if let Some(dir) = &args.output_dir {
        corpus::check_dir(dir)?;
    }
    if let Some(dir) = &args.keypoint_images {
        corpus::check_dir(dir)?;
    }

    let detector = Detector::new(params.clone());
    let filter = KeypointFilter::from(&params);
    let files = corpus::list_images(&args.image_dir)?;
    info!("Processing {} images in {}.", files.len(), args.image_dir.display());

    let mut written = 0usize;
    for path in &files {
        let image = match extract::load_grayscale(path) {
            Ok(image) => image,
            Err(err) => {
                warn!("could not read {}: {}", path.display(), err);
                continue;
            }
        };
        let features = filter.apply(&detector.detect(&image));
        info!(
            "{}: {} keypoints after filtering",
            path.display(),
            features.len()
        );

        let mut cache = feature_path(path);
        if let (Some(dir), Some(name)) = (&args.output_dir, cache.file_name()) {
            cache = dir.join(name);
        }
        if let Err(err) = FeatureFile::from_features(&features).save(&cache) {
            warn!("could not write {}: {}", cache.display(), err);
            continue;
        }
        written += 1;

        if let (Some(dir), Some(name)) = (&args.keypoint_images, path.file_name()) {
            match rank::load_rgb(path) {
                Ok(mut overlay) => {
                    rank::draw_keypoints(&mut overlay, &features.keypoints);
                    let out = dir.join(name);
                    if let Err(err) = overlay.save(&out) {
                        warn!("could not write {}: {}", out.display(), err);
                    }
                }
                Err(err) => warn!("could not reload {}: {}", path.display(), err),
            }
        }
    }

    logger::success(&format!(
        "cached features for {} of {} images",
        written,
        files.len()
    ));
    Ok(())
}
