//! Deterministic stand-ins for the embedding, rerank and generation services.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::error::RetrievalError;
use crate::models::ChunkRecord;
use crate::pipeline::embedder::Embedder;
use crate::pipeline::generator::Generator;
use crate::pipeline::reranker::{RerankHit, Reranker};
use crate::store::ChunkStore;

pub fn tokens(text: &str) -> Vec<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|tok| !tok.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Bag-of-words embedder over a fixed vocabulary; unknown words are dropped.
pub struct VocabEmbedder {
    vocab: Vec<&'static str>,
    calls: AtomicUsize,
}

impl Default for VocabEmbedder {
    fn default() -> Self {
        Self {
            vocab: vec![
                "what", "is", "the", "capital", "of", "france", "paris", "berlin", "germany",
                "borders",
            ],
            calls: AtomicUsize::new(0),
        }
    }
}

impl VocabEmbedder {
    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0; self.vocab.len()];
        for token in tokens(text) {
            if let Some(pos) = self.vocab.iter().position(|w| *w == token) {
                v[pos] += 1.0;
            }
        }
        v
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for VocabEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vector(text))
    }
}

/// Always returns the same vector.
pub struct FixedEmbedder(pub Vec<f32>);

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, RetrievalError> {
        Ok(self.0.clone())
    }
}

pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, RetrievalError> {
        Err(RetrievalError::RetrievalService(
            "connection refused".to_string(),
        ))
    }
}

/// Vocabulary embedder that fails on the `n`th call (1-based).
pub struct FlakyEmbedder {
    inner: VocabEmbedder,
    fail_at: usize,
}

impl FlakyEmbedder {
    pub fn failing_at(fail_at: usize) -> Self {
        Self {
            inner: VocabEmbedder::default(),
            fail_at,
        }
    }
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let call = self.inner.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_at {
            return Err(RetrievalError::RetrievalService(
                "429 Too Many Requests".to_string(),
            ));
        }
        Ok(self.inner.vector(text))
    }
}

/// Ranks documents by how many query words they contain.
#[derive(Default)]
pub struct OverlapReranker {
    calls: AtomicUsize,
}

impl OverlapReranker {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Reranker for OverlapReranker {
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankHit>, RetrievalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let wanted = tokens(query);
        let mut hits: Vec<RerankHit> = documents
            .iter()
            .enumerate()
            .map(|(index, doc)| {
                let words = tokens(doc);
                let overlap = wanted.iter().filter(|w| words.contains(w)).count();
                RerankHit {
                    index,
                    relevance_score: overlap as f32,
                }
            })
            .collect();
        hits.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        hits.truncate(top_n);
        Ok(hits)
    }
}

/// Returns a canned ranking regardless of input.
pub struct ScriptedReranker(pub Vec<usize>);

#[async_trait]
impl Reranker for ScriptedReranker {
    async fn rerank(
        &self,
        _query: &str,
        _documents: &[String],
        _top_n: usize,
    ) -> Result<Vec<RerankHit>, RetrievalError> {
        Ok(self
            .0
            .iter()
            .map(|&index| RerankHit {
                index,
                relevance_score: 0.5,
            })
            .collect())
    }
}

#[derive(Default)]
pub struct FailingReranker {
    calls: AtomicUsize,
}

impl FailingReranker {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Reranker for FailingReranker {
    async fn rerank(
        &self,
        _query: &str,
        _documents: &[String],
        _top_n: usize,
    ) -> Result<Vec<RerankHit>, RetrievalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(RetrievalError::RerankService("503 Service Unavailable".to_string()))
    }
}

/// Answers with a fixed string.
pub struct CannedGenerator(pub &'static str);

#[async_trait]
impl Generator for CannedGenerator {
    async fn generate(&self, _query: &str, _context: &str) -> Result<String, RetrievalError> {
        Ok(self.0.to_string())
    }
}

/// Store whose embeddings come from [`VocabEmbedder`].
pub fn capital_corpus(rows: &[(&str, &str)]) -> ChunkStore {
    let embedder = VocabEmbedder::default();
    let records = rows
        .iter()
        .map(|(text, url)| ChunkRecord {
            text: text.to_string(),
            url: url.to_string(),
            ..ChunkRecord::default()
        })
        .collect();
    let embeddings = rows.iter().map(|(text, _)| embedder.vector(text)).collect();
    ChunkStore::from_parts(records, embeddings).expect("fixture rows are aligned")
}

/// A complete HTTP/1.1 response with a JSON content type.
pub fn http_response(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

/// Local server answering every request with `response` verbatim, or never
/// answering when `response` is `None`. Returns its base URL.
pub async fn raw_http_server(response: Option<String>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let response = response.clone();
            tokio::spawn(async move {
                read_request(&mut socket).await;
                match response {
                    Some(response) => {
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    }
                    None => tokio::time::sleep(Duration::from_secs(60)).await,
                }
            });
        }
    });
    format!("http://{addr}")
}

/// Reads one request: headers plus `Content-Length` bytes of body.
async fn read_request(socket: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
        let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
        let body_len = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if buf.len() >= end + 4 + body_len {
            return;
        }
    }
}
