//! In-memory chunk store. A store is immutable once built; reloading builds a
//! fresh store and swaps it into the [`StoreHandle`] in one step, so requests
//! already holding a snapshot keep reading the old one.
//!
//! Chunk rows come from a CSV table (`.csv`) or JSON Lines (anything else).
//! Embeddings come from a 2-D NumPy array (`.npy`, float64 or float32) or a
//! JSON array of arrays.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use ndarray::Array2;
use ndarray_npy::{ReadNpyError, ReadNpyExt};
use thiserror::Error;
use tracing::info;

use crate::metrics;
use crate::models::{Chunk, ChunkRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid chunk row in {} at line {line}: {source}", .path.display())]
    Record {
        path: PathBuf,
        line: usize,
        source: serde_json::Error,
    },

    #[error("invalid chunk table {}: {source}", .path.display())]
    Table {
        path: PathBuf,
        source: csv::Error,
    },

    #[error("invalid embeddings file {}: {source}", .path.display())]
    Embeddings {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid embeddings array {}: {source}", .path.display())]
    Npy {
        path: PathBuf,
        source: ReadNpyError,
    },

    #[error("{rows} chunk rows but {embeddings} embedding vectors")]
    Alignment { rows: usize, embeddings: usize },

    #[error("embedding {row} has dimension {found}, expected {expected}")]
    Dimension {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("embedding {row} contains a non-finite component")]
    InvalidEmbedding { row: usize },
}

/// Immutable table of chunks sharing one embedding dimensionality.
#[derive(Debug, Default)]
pub struct ChunkStore {
    chunks: Vec<Chunk>,
    dimension: usize,
}

impl ChunkStore {
    /// Joins chunk rows and embedding vectors positionally.
    pub fn from_parts(
        records: Vec<ChunkRecord>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<Self, StoreError> {
        if records.len() != embeddings.len() {
            return Err(StoreError::Alignment {
                rows: records.len(),
                embeddings: embeddings.len(),
            });
        }

        let dimension = embeddings.first().map(Vec::len).unwrap_or(0);
        let mut chunks = Vec::with_capacity(records.len());
        for (row, (record, embedding)) in records.into_iter().zip(embeddings).enumerate() {
            if embedding.is_empty() || embedding.len() != dimension {
                return Err(StoreError::Dimension {
                    row,
                    expected: dimension,
                    found: embedding.len(),
                });
            }
            if embedding.iter().any(|v| !v.is_finite()) {
                return Err(StoreError::InvalidEmbedding { row });
            }
            chunks.push(Chunk {
                text: record.text,
                url: record.url,
                chunk_type: record.chunk_type,
                company_name: record.company_name,
                embedding,
            });
        }

        Ok(Self { chunks, dimension })
    }

    /// Loads a chunk table and its embeddings, picking each format by file
    /// extension.
    pub fn load(chunks_path: &Path, embeddings_path: &Path) -> Result<Self, StoreError> {
        let records = read_records(chunks_path)?;
        let embeddings = read_embeddings(embeddings_path)?;
        Self::from_parts(records, embeddings)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Embedding dimensionality; 0 for an empty store.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn get(&self, index: usize) -> Option<&Chunk> {
        self.chunks.get(index)
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }
}

pub(crate) fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .is_some_and(|found| found.eq_ignore_ascii_case(ext))
}

fn open(path: &Path) -> Result<BufReader<File>, StoreError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
}

pub(crate) fn read_records(path: &Path) -> Result<Vec<ChunkRecord>, StoreError> {
    if has_extension(path, "csv") {
        read_csv_records(path)
    } else {
        read_jsonl_records(path)
    }
}

fn read_csv_records(path: &Path) -> Result<Vec<ChunkRecord>, StoreError> {
    let mut reader = csv::Reader::from_reader(open(path)?);
    reader
        .deserialize()
        .collect::<Result<Vec<ChunkRecord>, _>>()
        .map_err(|source| StoreError::Table {
            path: path.to_path_buf(),
            source,
        })
}

fn read_jsonl_records(path: &Path) -> Result<Vec<ChunkRecord>, StoreError> {
    let reader = open(path)?;
    let mut records = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let record: ChunkRecord =
            serde_json::from_str(&line).map_err(|source| StoreError::Record {
                path: path.to_path_buf(),
                line: line_no + 1,
                source,
            })?;
        records.push(record);
    }
    Ok(records)
}

fn read_embeddings(path: &Path) -> Result<Vec<Vec<f32>>, StoreError> {
    if has_extension(path, "npy") {
        return read_npy_embeddings(path);
    }
    serde_json::from_reader(open(path)?).map_err(|source| StoreError::Embeddings {
        path: path.to_path_buf(),
        source,
    })
}

fn read_npy_embeddings(path: &Path) -> Result<Vec<Vec<f32>>, StoreError> {
    let npy_error = |source: ReadNpyError| StoreError::Npy {
        path: path.to_path_buf(),
        source,
    };
    let matrix = match Array2::<f64>::read_npy(open(path)?) {
        Ok(matrix) => matrix.mapv(|v| v as f32),
        Err(ReadNpyError::WrongDescriptor(_)) => {
            Array2::<f32>::read_npy(open(path)?).map_err(npy_error)?
        }
        Err(source) => return Err(npy_error(source)),
    };
    Ok(matrix.rows().into_iter().map(|row| row.to_vec()).collect())
}

/// The two artifacts a store is built from.
#[derive(Debug, Clone)]
pub struct StoreSource {
    pub chunks_path: PathBuf,
    pub embeddings_path: PathBuf,
}

impl StoreSource {
    pub fn new(chunks_path: impl Into<PathBuf>, embeddings_path: impl Into<PathBuf>) -> Self {
        Self {
            chunks_path: chunks_path.into(),
            embeddings_path: embeddings_path.into(),
        }
    }

    pub fn load(&self) -> Result<ChunkStore, StoreError> {
        let store = ChunkStore::load(&self.chunks_path, &self.embeddings_path)?;
        info!(
            chunks = store.len(),
            dimension = store.dimension(),
            path = %self.chunks_path.display(),
            "Chunk store loaded"
        );
        Ok(store)
    }
}

/// Process-wide holder of the current store snapshot.
#[derive(Debug)]
pub struct StoreHandle {
    current: RwLock<Arc<ChunkStore>>,
}

impl StoreHandle {
    pub fn new(store: ChunkStore) -> Self {
        metrics::STORE_CHUNKS.set(store.len() as i64);
        Self {
            current: RwLock::new(Arc::new(store)),
        }
    }

    /// The store as of now. Stays valid after a later [`StoreHandle::replace`].
    pub fn snapshot(&self) -> Arc<ChunkStore> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swaps in a new store and returns the previous one.
    pub fn replace(&self, store: ChunkStore) -> Arc<ChunkStore> {
        metrics::STORE_CHUNKS.set(store.len() as i64);
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, Arc::new(store))
    }
}
