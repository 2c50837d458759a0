//! Offline embedding job: embeds every row of the chunk table and writes the
//! embeddings artifact the server loads at startup.

use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use ndarray::Array2;
use ndarray_npy::WriteNpyExt;
use tempfile::NamedTempFile;
use tracing::info;

use crate::pipeline::{Embedder, RetryPolicy};
use crate::store::{has_extension, read_records, ChunkStore, StoreSource};

const PROGRESS_EVERY: usize = 100;

/// Embeds `source.chunks_path` row by row and writes `source.embeddings_path`.
///
/// Any provider failure aborts the job before the output path is touched.
/// The artifact is written to a temporary sibling and renamed into place.
pub async fn embed_corpus(
    embedder: &dyn Embedder,
    retry: &RetryPolicy,
    source: &StoreSource,
) -> Result<ChunkStore> {
    let records = read_records(&source.chunks_path)?;
    anyhow::ensure!(
        !records.is_empty(),
        "chunk table {} has no rows",
        source.chunks_path.display()
    );
    info!(
        rows = records.len(),
        path = %source.chunks_path.display(),
        "Embedding chunk table"
    );

    let mut embeddings = Vec::with_capacity(records.len());
    for (row, record) in records.iter().enumerate() {
        let embedding = retry
            .run("embedding", || embedder.embed(&record.text))
            .await
            .with_context(|| format!("embedding row {} failed", row))?;
        embeddings.push(embedding);
        if (row + 1) % PROGRESS_EVERY == 0 {
            info!(done = row + 1, total = records.len(), "Embedding progress");
        }
    }

    let store = ChunkStore::from_parts(records, embeddings)?;
    write_embeddings(&source.embeddings_path, &store)?;
    info!(
        chunks = store.len(),
        dimension = store.dimension(),
        path = %source.embeddings_path.display(),
        "Embeddings written"
    );
    Ok(store)
}

fn write_embeddings(path: &Path, store: &ChunkStore) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create a temporary file in {}", dir.display()))?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        if has_extension(path, "npy") {
            let flat: Vec<f32> = store
                .chunks()
                .iter()
                .flat_map(|chunk| chunk.embedding.iter().copied())
                .collect();
            let matrix = Array2::from_shape_vec((store.len(), store.dimension()), flat)?;
            matrix.write_npy(&mut writer)?;
        } else {
            let rows: Vec<&[f32]> = store
                .chunks()
                .iter()
                .map(|chunk| chunk.embedding.as_slice())
                .collect();
            serde_json::to_writer(&mut writer, &rows)?;
        }
        writer.flush()?;
    }
    tmp.persist(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
