use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::extract::Features;
use crate::{Result, RetrievalError};

/// Extension given to per-image feature cache files.
pub const FEATURE_SUFFIX: &str = "feat";

/// Row-major matrix record as stored on disk.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MatRecord {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl MatRecord {
    pub fn from_matrix(matrix: &DMatrix<f32>) -> Self {
        let mut data = Vec::with_capacity(matrix.nrows() * matrix.ncols());
        for r in 0..matrix.nrows() {
            for c in 0..matrix.ncols() {
                data.push(matrix[(r, c)]);
            }
        }
        Self {
            rows: matrix.nrows(),
            cols: matrix.ncols(),
            data,
        }
    }

    pub fn to_matrix(&self) -> DMatrix<f32> {
        DMatrix::from_row_slice(self.rows, self.cols, &self.data)
    }
}

/// Structured key-value container mapping record names to matrices, backed
/// by a single bincode file.
#[derive(Debug, Clone)]
pub struct MatStore {
    path: PathBuf,
}

impl MatStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the matrix stored under `name`.
    pub fn read(&self, name: &str) -> Result<DMatrix<f32>> {
        let map = self.load_map()?;
        map.get(name)
            .map(MatRecord::to_matrix)
            .ok_or_else(|| RetrievalError::MissingRecord(name.to_string()))
    }

    /// Write `matrix` under `name`, preserving other records in the file.
    pub fn write(&self, name: &str, matrix: &DMatrix<f32>) -> Result<()> {
        let mut map = if self.path.exists() {
            self.load_map()?
        } else {
            BTreeMap::new()
        };
        map.insert(name.to_string(), MatRecord::from_matrix(matrix));
        let serialized = bincode::serialize(&map)?;
        let mut file = File::create(&self.path)?;
        file.write_all(&serialized)?;
        Ok(())
    }

    fn load_map(&self) -> Result<BTreeMap<String, MatRecord>> {
        let mut file = File::open(&self.path)?;
        let mut buffer: Vec<u8> = Vec::new();
        file.read_to_end(&mut buffer)?;
        Ok(bincode::deserialize(&buffer)?)
    }
}

/// Per-image cache of filtered keypoints and their descriptor matrix.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FeatureFile {
    pub keypoints: Vec<crate::extract::KeyPoint>,
    descriptors: MatRecord,
}

impl FeatureFile {
    pub fn from_features(features: &Features) -> Self {
        Self {
            keypoints: features.keypoints.clone(),
            descriptors: MatRecord::from_matrix(&features.descriptors),
        }
    }

    pub fn into_features(self) -> Features {
        Features {
            descriptors: self.descriptors.to_matrix(),
            keypoints: self.keypoints,
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let serialized = bincode::serialize(&self)?;
        let mut file = File::create(path)?;
        file.write_all(&serialized)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut buffer: Vec<u8> = Vec::new();
        file.read_to_end(&mut buffer)?;
        Ok(bincode::deserialize(&buffer)?)
    }
}

/// Cache path for an image: same location, extension swapped for
/// [`FEATURE_SUFFIX`].
pub fn feature_path(image_path: &Path) -> PathBuf {
    image_path.with_extension(FEATURE_SUFFIX)
}

/// Word-document path for an image: `<output_dir>/<image-basename>.txt`.
pub fn document_path(output_dir: &Path, image_path: &Path) -> PathBuf {
    let stem = image_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    output_dir.join(format!("{}.txt", stem))
}

/// Write one word document, overwriting any previous content.
pub fn write_document(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents)?;
    Ok(())
}
