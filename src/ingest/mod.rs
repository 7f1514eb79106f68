//! Document ingestion pipeline
//!
//! Orchestrates one upload end to end: persist the original, extract
//! `{text, tables, pictures}`, index tables and picture captions, chunk
//! and embed the prose, and commit fragments with bounded parallelism.
//! Page rendering and asset moves are best-effort; extraction, embedding
//! and insert failures abort the ingestion with a stage tag.

pub mod paths;
mod render;

pub use paths::{safe_name, sha256_hex, StoredOriginal, UploadStore};
pub use render::render_pdf_pages;

use crate::chunk::ChunkTokenizer;
use crate::config::Config;
use crate::embed::{EmbedMode, Embedder};
use crate::error::{Error, Result};
use crate::parse::{
    decode_text, extract_hwpx, normalize_table, source_kind_for, ParsedSource, ParserBridge,
    RawPicture, RawTable, SourceKind,
};
use crate::store::{AssetKind, FragmentKind, FragmentMeta, NewAsset, TableBody, VectorStore};
use crate::textutil::{clean_text, normalize_row, row_sentence};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

/// Counters returned to the uploader
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub chunks: usize,
    pub stored: String,
    pub tables: usize,
    pub pages: usize,
    pub image_caption_chunks: usize,
}

/// One upload's worth of work
pub struct IngestPipeline {
    config: Arc<Config>,
    store: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
    bridge: ParserBridge,
    uploads: UploadStore,
    chunker: ChunkTokenizer,
}

impl IngestPipeline {
    pub fn new(
        config: Arc<Config>,
        store: Arc<VectorStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let bridge = ParserBridge::new(&config.ingest);
        let uploads = UploadStore::new(config.paths.uploads_dir.clone());
        let chunker = ChunkTokenizer::from_config(&config.chunk)?;
        Ok(Self {
            config,
            store,
            embedder,
            bridge,
            uploads,
            chunker,
        })
    }

    /// Ingest one uploaded file.
    pub async fn ingest(
        &self,
        bytes: &[u8],
        original_name: &str,
        mime: &str,
    ) -> Result<IngestReport> {
        if bytes.is_empty() {
            return Err(Error::Input("uploaded file is empty".to_string()));
        }

        let kind = source_kind_for(original_name, mime)?;

        let stored = self
            .uploads
            .store_original(bytes, original_name)
            .await
            .map_err(|e| e.at_stage("persist"))?;

        let parsed = self.extract(kind, bytes, &stored).await?;
        let text = clean_text(&parsed.text);

        if text.is_empty() && parsed.tables.is_empty() && parsed.pictures.is_empty() {
            return Err(Error::Input(
                "document produced no extractable content".to_string(),
            ));
        }

        let mut report = IngestReport {
            stored: stored.rel.clone(),
            ..Default::default()
        };

        if self.config.ingest.render_pages && kind == SourceKind::Pdf {
            let out_dir = self.uploads.derived_dir(&stored, "pages");
            match render_pdf_pages(&stored.abs, &out_dir, self.config.ingest.render_dpi).await {
                Ok(pages) => report.pages = pages,
                Err(e) => warn!("Page rendering failed for {}: {}", stored.rel, e),
            }
        }

        if self.config.ingest.enable_table_index && !parsed.tables.is_empty() {
            report.tables = self
                .index_tables(&parsed.tables, &stored, original_name)
                .await?;
        }

        if !parsed.pictures.is_empty() {
            report.image_caption_chunks = self
                .index_pictures(&parsed.pictures, &stored, original_name)
                .await?;
        }

        if !text.is_empty() {
            report.chunks = self.index_prose(&text, kind, &stored, original_name).await?;
        }

        info!(
            "Ingested {} ({}): {} chunks, {} tables, {} caption fragments",
            original_name, stored.rel, report.chunks, report.tables, report.image_caption_chunks
        );
        Ok(report)
    }

    async fn extract(
        &self,
        kind: SourceKind,
        bytes: &[u8],
        stored: &StoredOriginal,
    ) -> Result<ParsedSource> {
        match kind {
            SourceKind::Pdf | SourceKind::Office => {
                let out_dir = self.uploads.derived_dir(stored, "parsed");
                tokio::fs::create_dir_all(&out_dir)
                    .await
                    .map_err(|e| Error::from(e).at_stage("parse"))?;
                self.bridge
                    .extract(&stored.abs, &out_dir)
                    .await
                    .map_err(|e| e.at_stage("parse"))
            }
            SourceKind::Text => Ok(ParsedSource {
                text: decode_text(bytes),
                engine: "text".to_string(),
                ..Default::default()
            }),
            SourceKind::Hwpx => extract_hwpx(bytes).map_err(|e| e.at_stage("parse")),
            SourceKind::Hwp => self.convert_hwp(&stored.abs).await,
        }
    }

    async fn convert_hwp(&self, path: &Path) -> Result<ParsedSource> {
        let exe = self.config.ingest.hwp2txt_exe.as_ref().ok_or_else(|| {
            Error::UnsupportedType("HWP uploads need an external converter (HWP2TXT_EXE)".to_string())
        })?;

        let mut command = Command::new(exe);
        command
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let timeout = Duration::from_secs(self.config.ingest.parser_timeout_secs);
        let output = tokio::time::timeout(timeout, command.output())
            .await
            .map_err(|_| Error::Parse("HWP converter timed out".to_string()).at_stage("parse"))?
            .map_err(|e| Error::Parse(format!("failed to spawn HWP converter: {}", e)).at_stage("parse"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Parse(format!(
                "HWP converter exited with {}: {}",
                output.status,
                stderr.chars().take(300).collect::<String>()
            ))
            .at_stage("parse"));
        }

        Ok(ParsedSource {
            text: decode_text(&output.stdout),
            engine: "hwp2txt".to_string(),
            ..Default::default()
        })
    }

    /// Embed a caption when the gates allow it (non-empty, within the page
    /// budget, and not in fast mode).
    async fn maybe_embed_caption(
        &self,
        caption: &str,
        page: Option<i64>,
    ) -> Result<Option<Vec<f32>>> {
        if self.config.ingest.fast_mode || caption.trim().is_empty() {
            return Ok(None);
        }
        if let Some(p) = page {
            if p > self.config.ingest.max_caption_pages {
                return Ok(None);
            }
        }
        let vec = self.embedder.embed_one(caption, EmbedMode::Passage).await?;
        Ok(Some(vec))
    }

    async fn index_tables(
        &self,
        tables: &[RawTable],
        stored: &StoredOriginal,
        original_name: &str,
    ) -> Result<usize> {
        let mut indexed = 0usize;

        for (table_index, raw) in tables.iter().enumerate() {
            let table = normalize_table(raw);

            let mut image_url = None;
            if let Some(img) = &raw.image_path {
                match self.uploads.adopt_asset(Path::new(img), stored, "tables").await {
                    Ok((_rel, url)) => image_url = Some(url),
                    Err(e) => warn!("Table image move failed for {}: {}", stored.rel, e),
                }
            }

            let caption = raw.caption.clone().unwrap_or_default();
            let caption_emb = self
                .maybe_embed_caption(&caption, raw.page)
                .await
                .map_err(|e| e.at_stage("table_captions"))?;

            let asset_id = self
                .store
                .insert_asset(&NewAsset {
                    sha256: stored.sha256.clone(),
                    filepath: original_name.to_string(),
                    page: raw.page,
                    kind: AssetKind::Table,
                    image_url,
                    caption_text: if caption.is_empty() {
                        None
                    } else {
                        Some(caption.clone())
                    },
                    caption_emb,
                    meta: serde_json::json!({
                        "table_index": table_index,
                        "source": raw.source.clone(),
                    }),
                })
                .await
                .map_err(|e| e.at_stage("table_assets"))?;

            self.store
                .insert_table_body(&TableBody {
                    asset_id,
                    n_rows: table.n_rows,
                    n_cols: table.n_cols,
                    tsv: table.tsv.clone(),
                    md: table.md.clone(),
                    html: table.html.clone(),
                })
                .await
                .map_err(|e| e.at_stage("table_bodies"))?;

            let row_cap = self.config.effective_row_cap();
            if row_cap > 0 && !table.rows.is_empty() {
                let rows: Vec<Vec<String>> =
                    table.rows.iter().take(row_cap).cloned().collect();
                let sentences: Vec<String> = rows
                    .iter()
                    .map(|row| row_sentence(&caption, &table.header, row))
                    .collect();

                let vectors = self
                    .embedder
                    .embed_batch(&sentences, EmbedMode::Passage)
                    .await
                    .map_err(|e| e.at_stage("table_rows"))?;
                if vectors.len() != sentences.len() {
                    return Err(Error::EmbeddingShape(format!(
                        "requested {} row embeddings, got {}",
                        sentences.len(),
                        vectors.len()
                    ))
                    .at_stage("table_rows"));
                }

                let items: Vec<(String, FragmentMeta, Vec<f32>)> = sentences
                    .into_iter()
                    .zip(vectors)
                    .enumerate()
                    .map(|(row_index, (sentence, vec))| {
                        let meta = FragmentMeta {
                            kind: Some(FragmentKind::TableRow),
                            sha256: Some(stored.sha256.clone()),
                            filepath: Some(original_name.to_string()),
                            stored_path: Some(stored.rel.clone()),
                            asset_id: Some(asset_id),
                            row_index: Some(row_index as i64),
                            headers: Some(table.header.clone()),
                            normalized: Some(normalize_row(&rows[row_index])),
                            caption: if caption.is_empty() {
                                None
                            } else {
                                Some(caption.clone())
                            },
                            page: raw.page,
                            ..Default::default()
                        };
                        (sentence, meta, vec)
                    })
                    .collect();

                self.insert_fragments_bounded(items, "table_rows").await?;
            }

            indexed += 1;
        }

        Ok(indexed)
    }

    async fn index_pictures(
        &self,
        pictures: &[RawPicture],
        stored: &StoredOriginal,
        original_name: &str,
    ) -> Result<usize> {
        let mut caption_fragments = 0usize;

        for pic in pictures {
            let mut image_url = None;
            if let Some(img) = &pic.image_path {
                match self
                    .uploads
                    .adopt_asset(Path::new(img), stored, "pictures")
                    .await
                {
                    Ok((_rel, url)) => image_url = Some(url),
                    Err(e) => warn!("Picture move failed for {}: {}", stored.rel, e),
                }
            }

            let caption = pic.caption.clone().unwrap_or_default();
            let caption_emb = self
                .maybe_embed_caption(&caption, pic.page)
                .await
                .map_err(|e| e.at_stage("image_captions"))?;

            self.store
                .insert_asset(&NewAsset {
                    sha256: stored.sha256.clone(),
                    filepath: original_name.to_string(),
                    page: pic.page,
                    kind: AssetKind::Image,
                    image_url,
                    caption_text: if caption.is_empty() {
                        None
                    } else {
                        Some(caption.clone())
                    },
                    caption_emb: caption_emb.clone(),
                    meta: serde_json::json!({ "source": pic.source.clone() }),
                })
                .await
                .map_err(|e| e.at_stage("image_assets"))?;

            // A computed caption embedding always mirrors into a fragment
            // so captions participate in retrieval.
            if let Some(vec) = caption_emb {
                let meta = FragmentMeta {
                    kind: Some(FragmentKind::ImageCaption),
                    sha256: Some(stored.sha256.clone()),
                    filepath: Some(original_name.to_string()),
                    stored_path: Some(stored.rel.clone()),
                    caption: Some(caption.clone()),
                    page: pic.page,
                    ..Default::default()
                };
                self.store
                    .insert_fragment(&caption, &meta, &vec)
                    .await
                    .map_err(|e| e.at_stage("image_captions"))?;
                caption_fragments += 1;
            }
        }

        Ok(caption_fragments)
    }

    async fn index_prose(
        &self,
        text: &str,
        kind: SourceKind,
        stored: &StoredOriginal,
        original_name: &str,
    ) -> Result<usize> {
        let mut spans = self.chunker.chunk(
            text,
            self.config.chunk.size_tokens,
            self.config.chunk.overlap_tokens,
        )?;

        let cap = self.config.effective_chunk_cap();
        if cap > 0 && spans.len() > cap {
            warn!(
                "Chunk cap {} applied ({} chunks produced) for {}",
                cap,
                spans.len(),
                stored.rel
            );
            spans.truncate(cap);
        }

        if spans.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = spans.iter().map(|s| s.text.clone()).collect();
        let vectors = self
            .embedder
            .embed_batch(&texts, EmbedMode::Passage)
            .await
            .map_err(|e| e.at_stage("embed"))?;
        if vectors.len() != texts.len() {
            return Err(Error::EmbeddingShape(format!(
                "requested {} chunk embeddings, got {}",
                texts.len(),
                vectors.len()
            ))
            .at_stage("embed"));
        }

        let fragment_kind = kind.fragment_kind();
        let items: Vec<(String, FragmentMeta, Vec<f32>)> = spans
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(chunk_index, (span, vec))| {
                let meta = FragmentMeta {
                    kind: Some(fragment_kind),
                    sha256: Some(stored.sha256.clone()),
                    filepath: Some(original_name.to_string()),
                    stored_path: Some(stored.rel.clone()),
                    chunk_index: Some(chunk_index as i64),
                    start_tok: Some(span.start_tok as i64),
                    end_tok: Some(span.end_tok as i64),
                    ..Default::default()
                };
                (span.text, meta, vec)
            })
            .collect();

        self.insert_fragments_bounded(items, "chunks").await
    }

    /// Insert fragments with bounded parallelism. The first failure drops
    /// the remaining work and surfaces with the stage tag; fragments whose
    /// transactions already committed stay indexed.
    async fn insert_fragments_bounded(
        &self,
        items: Vec<(String, FragmentMeta, Vec<f32>)>,
        stage: &str,
    ) -> Result<usize> {
        let concurrency = self.config.ingest.insert_concurrency;
        let mut results = stream::iter(items.into_iter().map(|(content, meta, vec)| {
            let store = Arc::clone(&self.store);
            async move { store.insert_fragment(&content, &meta, &vec).await }
        }))
        .buffer_unordered(concurrency);

        let mut inserted = 0usize;
        while let Some(result) = results.next().await {
            result.map_err(|e| e.at_stage(stage))?;
            inserted += 1;
        }
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SearchOptions;
    use async_trait::async_trait;
    use std::io::Write;
    use tempfile::TempDir;

    const DIM: usize = 8;

    /// Deterministic text-hash embedder
    struct FakeEmbedder {
        dim: usize,
    }

    impl FakeEmbedder {
        fn vec_for(&self, text: &str) -> Vec<f32> {
            use std::collections::hash_map::DefaultHasher;
            use std::hash::{Hash, Hasher};
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            let seed = hasher.finish();
            (0..self.dim)
                .map(|i| {
                    let x = seed.wrapping_add(i as u64).wrapping_mul(0x9E3779B97F4A7C15);
                    (x as f32 / u64::MAX as f32) - 0.5
                })
                .collect()
        }
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed_one(&self, text: &str, _mode: EmbedMode) -> crate::error::Result<Vec<f32>> {
            Ok(self.vec_for(text))
        }

        async fn embed_batch(
            &self,
            texts: &[String],
            _mode: EmbedMode,
        ) -> crate::error::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| self.vec_for(t)).collect())
        }

        fn dimension(&self) -> usize {
            self.dim
        }
    }

    /// Embedder that returns vectors of the wrong dimension
    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        async fn embed_one(&self, _text: &str, _mode: EmbedMode) -> crate::error::Result<Vec<f32>> {
            Ok(vec![0.5; DIM + 1])
        }

        async fn embed_batch(
            &self,
            texts: &[String],
            _mode: EmbedMode,
        ) -> crate::error::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.5; DIM + 1]).collect())
        }

        fn dimension(&self) -> usize {
            DIM + 1
        }
    }

    async fn test_pipeline(
        tmp: &TempDir,
        embedder: Arc<dyn Embedder>,
    ) -> (IngestPipeline, Arc<VectorStore>) {
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        let store = Arc::new(
            VectorStore::open(&config.paths.db_file, DIM).await.unwrap(),
        );
        let pipeline =
            IngestPipeline::new(Arc::new(config), Arc::clone(&store), embedder).unwrap();
        (pipeline, store)
    }

    #[tokio::test]
    async fn test_ingest_small_txt() {
        let tmp = TempDir::new().unwrap();
        let embedder = Arc::new(FakeEmbedder { dim: DIM });
        let (pipeline, store) = test_pipeline(&tmp, embedder.clone()).await;

        let body = "RAG는 검색 증강 생성 기법이다.";
        let report = pipeline
            .ingest(body.as_bytes(), "a.txt", "text/plain")
            .await
            .unwrap();

        assert_eq!(report.chunks, 1);
        assert_eq!(report.tables, 0);
        assert_eq!(report.pages, 0);
        assert!(!report.stored.is_empty());

        // The chunk is searchable, carries its provenance, and matches a
        // query embedded from the same text.
        let hits = store
            .top_k(
                &embedder.vec_for(body),
                SearchOptions {
                    k: 5,
                    threshold: 0.7,
                    kinds: Some([FragmentKind::Text].into_iter().collect()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, body);
        assert_eq!(hits[0].meta.filepath.as_deref(), Some("a.txt"));
        assert_eq!(hits[0].meta.chunk_index, Some(0));
    }

    #[tokio::test]
    async fn test_empty_file_rejected() {
        let tmp = TempDir::new().unwrap();
        let (pipeline, _store) =
            test_pipeline(&tmp, Arc::new(FakeEmbedder { dim: DIM })).await;

        let err = pipeline.ingest(b"", "a.txt", "text/plain").await.unwrap_err();
        assert!(matches!(err, Error::Input(_)));
    }

    #[tokio::test]
    async fn test_blank_text_rejected() {
        let tmp = TempDir::new().unwrap();
        let (pipeline, _store) =
            test_pipeline(&tmp, Arc::new(FakeEmbedder { dim: DIM })).await;

        let err = pipeline
            .ingest(b"   \n \n ", "a.txt", "text/plain")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Input(_)));
    }

    #[tokio::test]
    async fn test_unsupported_and_image_uploads_rejected() {
        let tmp = TempDir::new().unwrap();
        let (pipeline, _store) =
            test_pipeline(&tmp, Arc::new(FakeEmbedder { dim: DIM })).await;

        assert!(matches!(
            pipeline.ingest(b"x", "a.zip", "application/zip").await,
            Err(Error::UnsupportedType(_))
        ));
        assert!(matches!(
            pipeline.ingest(b"x", "scan.png", "image/png").await,
            Err(Error::Input(_))
        ));
    }

    #[tokio::test]
    async fn test_hwp_without_converter_unsupported() {
        let tmp = TempDir::new().unwrap();
        let (pipeline, _store) =
            test_pipeline(&tmp, Arc::new(FakeEmbedder { dim: DIM })).await;

        let err = pipeline
            .ingest(b"hwp-bytes", "old.hwp", "")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedType(_)));
    }

    #[tokio::test]
    async fn test_ingest_hwpx_counts_tables() {
        let tmp = TempDir::new().unwrap();
        let (pipeline, store) =
            test_pipeline(&tmp, Arc::new(FakeEmbedder { dim: DIM })).await;

        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            let options = zip::write::SimpleFileOptions::default();
            writer
                .start_file("Contents/section0.xml", options)
                .unwrap();
            writer
                .write_all(
                    "<hp:p><hp:t>본문 텍스트</hp:t></hp:p><hp:tbl></hp:tbl>".as_bytes(),
                )
                .unwrap();
            writer.finish().unwrap();
        }

        let report = pipeline
            .ingest(&buf.into_inner(), "doc.hwpx", "")
            .await
            .unwrap();
        assert_eq!(report.chunks, 1);
        assert_eq!(report.tables, 1);
        // The stub table has no rows, so the only fragment is the chunk.
        assert_eq!(store.count_fragments().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_insert_surfaces_ingest_error() {
        let tmp = TempDir::new().unwrap();
        let (pipeline, store) = test_pipeline(&tmp, Arc::new(BrokenEmbedder)).await;

        let err = pipeline
            .ingest("본문".as_bytes(), "a.txt", "text/plain")
            .await
            .unwrap_err();
        match err {
            Error::Ingest { stage, .. } => assert_eq!(stage, "chunks"),
            other => panic!("expected ingest error, got {:?}", other),
        }
        assert_eq!(store.count_fragments().await.unwrap(), 0);

        // The service is still healthy: a later upload with a working
        // embedder succeeds against the same store.
        let good = IngestPipeline::new(
            Arc::new({
                let mut c = Config::default();
                c.init_paths(Some(tmp.path().to_path_buf()));
                c
            }),
            Arc::clone(&store),
            Arc::new(FakeEmbedder { dim: DIM }),
        )
        .unwrap();
        let report = good
            .ingest("다른 문서".as_bytes(), "b.txt", "text/plain")
            .await
            .unwrap();
        assert_eq!(report.chunks, 1);
        assert_eq!(store.count_fragments().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_fast_mode_caps_chunks() {
        let tmp = TempDir::new().unwrap();
        let embedder = Arc::new(FakeEmbedder { dim: DIM });

        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        config.ingest.fast_mode = true;
        config.chunk.size_tokens = 4;
        config.chunk.overlap_tokens = 1;

        let store = Arc::new(
            VectorStore::open(&config.paths.db_file, DIM).await.unwrap(),
        );
        let pipeline =
            IngestPipeline::new(Arc::new(config), Arc::clone(&store), embedder).unwrap();

        // 200 tokens at window 4 / step 3 is far more than 24 chunks
        let body = (0..200).map(|i| format!("단어{}", i)).collect::<Vec<_>>().join(" ");
        let report = pipeline
            .ingest(body.as_bytes(), "long.txt", "text/plain")
            .await
            .unwrap();
        assert_eq!(report.chunks, 24);
    }
}
