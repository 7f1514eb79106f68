//! Retrieval and routing core
//!
//! Answers one question: smalltalk shortcut, query embedding, multi-slice
//! retrieval, confidence gate, prompt-regime selection, context
//! composition and streaming generation.

mod intent;
mod prompts;

pub use intent::{DocIntent, IntentClassifier};
pub use prompts::*;

use crate::config::Config;
use crate::embed::{EmbedMode, Embedder};
use crate::error::{Error, Result};
use crate::llm::{ChatMessage, GenerationParams, Generator};
use crate::store::{FragmentKind, SearchHit, SearchOptions, VectorStore};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Which answer regime handled the question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RagMode {
    #[serde(rename = "smalltalk")]
    Smalltalk,
    #[serde(rename = "rag-plain")]
    RagPlain,
    #[serde(rename = "rag-table")]
    RagTable,
    #[serde(rename = "general")]
    General,
}

/// One cited source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<FragmentKind>,
    pub sim: f32,
}

/// One answer request
#[derive(Debug, Clone, Default)]
pub struct AnswerRequest {
    pub question: String,
    pub history: Vec<ChatMessage>,
    pub match_count: Option<usize>,
    pub max_new_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
}

/// The routed answer
#[derive(Debug, Clone, Serialize)]
pub struct AnswerResponse {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub rag_mode: RagMode,
}

/// Router over store, embedder and generator
pub struct RagRouter {
    config: Arc<Config>,
    store: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    intent: IntentClassifier,
}

/// Trim a snippet to the character budget, collapsing the middle.
fn trim_middle(content: &str, budget: usize) -> String {
    let chars: Vec<char> = content.chars().collect();
    if chars.len() <= budget {
        return content.to_string();
    }
    let half = budget / 2;
    let head: String = chars[..half].iter().collect();
    let tail: String = chars[chars.len() - half..].iter().collect();
    format!("{}...\n{}", head, tail)
}

fn prose_kinds() -> HashSet<FragmentKind> {
    [
        FragmentKind::Pdf,
        FragmentKind::Text,
        FragmentKind::Office,
        FragmentKind::Hwpx,
        FragmentKind::Hwp,
    ]
    .into_iter()
    .collect()
}

impl RagRouter {
    pub fn new(
        config: Arc<Config>,
        store: Arc<VectorStore>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            config,
            store,
            embedder,
            generator,
            intent: IntentClassifier::new(),
        }
    }

    /// Answer one question.
    pub async fn answer(&self, request: AnswerRequest) -> Result<AnswerResponse> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(Error::Input("question is empty".to_string()));
        }

        if self.intent.is_smalltalk(question) {
            let answer = self
                .generate(SMALLTALK_PROMPT, "", question, &request)
                .await?;
            return Ok(AnswerResponse {
                answer,
                sources: Vec::new(),
                rag_mode: RagMode::Smalltalk,
            });
        }

        let query_vec = self.embedder.embed_one(question, EmbedMode::Query).await?;
        let hits = self.retrieve(&query_vec, request.match_count).await?;

        let max_sim = hits.iter().map(|h| h.sim).fold(0.0f32, f32::max);
        let top3_avg = top3_average(&hits);
        let retrieval = &self.config.retrieval;
        let document_mode =
            max_sim >= retrieval.use_as_ctx_min || top3_avg >= retrieval.min_top3_avg;
        debug!(
            "Retrieved {} fragments (maxSim {:.3}, top3Avg {:.3}) -> {}",
            hits.len(),
            max_sim,
            top3_avg,
            if document_mode { "document" } else { "general" }
        );

        if !document_mode {
            let answer = self.generate(GENERAL_PROMPT, "", question, &request).await?;
            return Ok(AnswerResponse {
                answer,
                sources: Vec::new(),
                rag_mode: RagMode::General,
            });
        }

        let doc_intent = self
            .intent
            .classify_document_intent(self.generator.as_ref(), question)
            .await;
        let (system_prompt, rag_mode) = match doc_intent {
            DocIntent::Plain => (PLAIN_PROMPT, RagMode::RagPlain),
            DocIntent::Table => (TABLE_PROMPT, RagMode::RagTable),
        };

        let (context, mut sources) = self.compose_context(&hits);
        let answer = self
            .generate(system_prompt, &context, question, &request)
            .await?;

        // Never cite documents for an answer that declined to answer.
        let refusal = answer.trim().is_empty() || answer.contains("모릅니다");
        if refusal {
            sources.clear();
        }

        Ok(AnswerResponse {
            answer,
            sources,
            rag_mode,
        })
    }

    /// Three slices against the same query vector, union preserving
    /// per-slice order.
    async fn retrieve(
        &self,
        query_vec: &[f32],
        match_count: Option<usize>,
    ) -> Result<Vec<SearchHit>> {
        let retrieval = &self.config.retrieval;
        let threshold = retrieval.retrieve_min;

        let prose = self
            .store
            .top_k(
                query_vec,
                SearchOptions {
                    k: match_count.unwrap_or(retrieval.text_k),
                    threshold,
                    kinds: Some(prose_kinds()),
                    sha256: None,
                },
            )
            .await?;

        let tables = self
            .store
            .top_k(
                query_vec,
                SearchOptions {
                    k: retrieval.table_k,
                    threshold,
                    kinds: Some([FragmentKind::TableRow].into_iter().collect()),
                    sha256: None,
                },
            )
            .await?;

        let images = self
            .store
            .top_k(
                query_vec,
                SearchOptions {
                    k: retrieval.image_k,
                    threshold,
                    kinds: Some([FragmentKind::ImageCaption].into_iter().collect()),
                    sha256: None,
                },
            )
            .await?;

        let mut union = prose;
        union.extend(tables);
        union.extend(images);
        Ok(union)
    }

    /// Build the `<document>` context block and the source list in one
    /// ranked pass over the retrieved fragments.
    fn compose_context(&self, hits: &[SearchHit]) -> (String, Vec<SourceRef>) {
        let retrieval = &self.config.retrieval;

        let mut ranked: Vec<&SearchHit> = hits.iter().collect();
        ranked.sort_by(|a, b| b.sim.partial_cmp(&a.sim).unwrap_or(std::cmp::Ordering::Equal));

        let mut context = String::new();
        let mut sources = Vec::new();

        for hit in ranked {
            let filename = hit
                .meta
                .filepath
                .clone()
                .or_else(|| hit.meta.stored_path.clone())
                .unwrap_or_else(|| "unknown".to_string());
            let page = hit
                .meta
                .page
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string());
            let kind = hit
                .meta
                .kind
                .map(|k| k.to_string())
                .unwrap_or_else(|| "text".to_string());

            let snippet = trim_middle(&hit.content, retrieval.snippet_chars);
            let block = format!(
                "<document source=\"{}\" page=\"{}\" type=\"{}\">\n{}\n</document>\n",
                filename, page, kind, snippet
            );

            if context.chars().count() + block.chars().count() > retrieval.max_ctx_chars
                && !context.is_empty()
            {
                break;
            }

            context.push_str(&block);
            sources.push(SourceRef {
                filename,
                page: hit.meta.page,
                kind: hit.meta.kind,
                sim: hit.sim,
            });
        }

        (context, sources)
    }

    async fn generate(
        &self,
        system_prompt: &str,
        context: &str,
        question: &str,
        request: &AnswerRequest,
    ) -> Result<String> {
        let generation = &self.config.generation;
        let params = GenerationParams {
            max_tokens: request.max_new_tokens.unwrap_or(generation.max_new_tokens),
            temperature: request.temperature.unwrap_or(generation.temperature),
            top_p: request.top_p.unwrap_or(generation.top_p),
        };

        let mut messages = vec![ChatMessage::system(system_prompt)];
        if !context.is_empty() {
            messages.push(ChatMessage::system(format!(
                "{}\n\n{}",
                CONTEXT_PREAMBLE, context
            )));
        }

        let max_turns = self.config.retrieval.history_max_turns;
        let history = request
            .history
            .iter()
            .filter(|m| m.role == "user" || m.role == "assistant")
            .cloned()
            .collect::<Vec<_>>();
        let start = history.len().saturating_sub(max_turns);
        messages.extend(history[start..].iter().cloned());

        messages.push(ChatMessage::user(question));

        self.generator.stream(&messages, params).await
    }
}

fn top3_average(hits: &[SearchHit]) -> f32 {
    if hits.len() < 3 {
        return 0.0;
    }
    let mut sims: Vec<f32> = hits.iter().map(|h| h.sim).collect();
    sims.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    (sims[0] + sims[1] + sims[2]) / 3.0
}
