//! Encodes every corpus image as a visual-word text document against an
//! existing vocabulary.

use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;
use std::process;

use rivet::document::{encode_document, TokenMode};
use rivet::store::{document_path, write_document};
use rivet::{
    config::DetectorParams, corpus, extract, logger, Detector, KeypointFilter, MatStore,
    Vocabulary, WeightMode,
};

#[derive(Parser, Debug)]
#[command(name = "make-documents", version, about = "Write visual-word documents for a corpus")]
struct Args {
    /// Directory of images to encode
    #[arg(short = 'i', long, value_name = "DIR")]
    image_dir: PathBuf,

    /// Vocabulary store file
    #[arg(short = 'v', long, value_name = "FILE")]
    vocab: PathBuf,

    /// Record name inside the store
    #[arg(short = 'n', long, default_value = "vocabulary")]
    name: String,

    /// Directory for the `.txt` documents
    #[arg(short = 'o', long, value_name = "DIR")]
    output_dir: PathBuf,

    /// Detector parameter file (`key : value` lines)
    #[arg(short = 'p', long, value_name = "FILE")]
    params: Option<PathBuf>,

    /// Emit each word once instead of repeating by frequency
    #[arg(long)]
    presence: bool,

    /// Leave images alone when their document already exists
    #[arg(long)]
    skip_existing: bool,

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
    corpus::check_dir(&args.output_dir)?;

    let store = MatStore::new(&args.vocab);
    let vocabulary = Vocabulary::load(&store, &args.name)?;
    info!(
        "Loaded vocabulary `{}` with {} words from {}.",
        args.name,
        vocabulary.len(),
        args.vocab.display()
    );

    let mode = if args.presence {
        TokenMode::Presence
    } else {
        TokenMode::Frequency
    };
    let detector = Detector::new(params.clone());
    let filter = KeypointFilter::from(&params);
    let files = corpus::list_images(&args.image_dir)?;
    info!("Encoding {} images.", files.len());

    let mut written = 0usize;
    for path in &files {
        let out = document_path(&args.output_dir, path);
        if args.skip_existing && out.exists() {
            info!("skipping {}, document exists", path.display());
            continue;
        }
        let image = match extract::load_grayscale(path) {
            Ok(image) => image,
            Err(err) => {
                warn!("could not read {}: {}", path.display(), err);
                continue;
            }
        };
        let features = filter.apply(&detector.detect(&image));
        let histogram = vocabulary.encode(&features.descriptors, WeightMode::Normalized);
        let document = encode_document(&histogram, features.len(), mode);
        if let Err(err) = write_document(&out, &document) {
            warn!("could not write {}: {}", out.display(), err);
            continue;
        }
        written += 1;
    }

    logger::success(&format!(
        "wrote {} of {} documents to {}",
        written,
        files.len(),
        args.output_dir.display()
    ));
    Ok(())
}
