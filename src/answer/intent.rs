//! Question intent detection
//!
//! Two cheap gates in front of generation: a smalltalk regex that skips
//! retrieval entirely, and a plain-vs-table classifier for document mode
//! that only calls the model when the keyword regex is inconclusive.

use crate::answer::prompts::CLASSIFIER_PROMPT;
use crate::llm::{ChatMessage, GenerationParams, Generator};
use regex::Regex;
use std::time::Duration;
use tracing::debug;

const CLASSIFIER_TIMEOUT: Duration = Duration::from_secs(5);

/// Sub-intent within document mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocIntent {
    Plain,
    Table,
}

pub struct IntentClassifier {
    smalltalk: Regex,
    table_keywords: Regex,
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentClassifier {
    pub fn new() -> Self {
        let smalltalk = Regex::new(
            r"(?i)^\s*(안녕하세요|안녕|반갑습니다|반가워요?|고마워요?|고맙습니다|감사합니다|감사해요?|잘\s*가요?|바이바이|바이|하이|헬로우?|또\s*봐요?|좋은\s*(아침|하루)|누구세요|누구야|누구니|넌\s*누구|너는\s*누구|자기\s*소개|도움말|도와줘|뭘\s*할\s*수\s*있|hello|hi|hey|howdy|thanks|thank\s+you|bye|goodbye|good\s*(morning|evening|night)|who\s+are\s+you|what\s+can\s+you\s+do|help)(\b|$)",
        )
        .unwrap();

        let table_keywords = Regex::new(
            r"(?i)(표\b|표에|표의|표를|테이블|행\b|열\b|셀\b|컬럼|칼럼|합계|총합|총계|평균|최댓값|최솟값|수치|통계|엑셀|스프레드\s*시트|table|rows?\b|columns?\b|cells?\b|spreadsheet|sheet\b|excel|csv\b|tsv\b|sum\b|average|mean\b|total\b|몇\s*(개|명|건|번|퍼센트|%))",
        )
        .unwrap();

        Self {
            smalltalk,
            table_keywords,
        }
    }

    /// Greetings/thanks/bye/self-intro/help, any language.
    pub fn is_smalltalk(&self, question: &str) -> bool {
        self.smalltalk.is_match(question)
    }

    /// Decide plain vs. table for document mode. Keyword hit answers
    /// immediately; otherwise one cheap deterministic model call, with
    /// `plain` as the timeout/failure default.
    pub async fn classify_document_intent(
        &self,
        generator: &dyn Generator,
        question: &str,
    ) -> DocIntent {
        if self.table_keywords.is_match(question) {
            return DocIntent::Table;
        }

        let messages = [
            ChatMessage::system(CLASSIFIER_PROMPT),
            ChatMessage::user(question),
        ];
        let params = GenerationParams {
            max_tokens: 10,
            temperature: 0.0,
            top_p: 1.0,
        };

        match tokio::time::timeout(CLASSIFIER_TIMEOUT, generator.complete(&messages, params)).await
        {
            Ok(Ok(verdict)) if verdict.to_lowercase().contains("table") => DocIntent::Table,
            Ok(Ok(_)) => DocIntent::Plain,
            Ok(Err(e)) => {
                debug!("Intent classifier failed, defaulting to plain: {}", e);
                DocIntent::Plain
            }
            Err(_) => {
                debug!("Intent classifier timed out, defaulting to plain");
                DocIntent::Plain
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use async_trait::async_trait;

    struct Scripted(&'static str);

    #[async_trait]
    impl Generator for Scripted {
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _params: GenerationParams,
        ) -> Result<String> {
            Ok(self.0.to_string())
        }

        async fn stream(
            &self,
            _messages: &[ChatMessage],
            _params: GenerationParams,
        ) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn test_smalltalk_matches() {
        let intent = IntentClassifier::new();
        for q in [
            "안녕",
            "안녕하세요!",
            "  고마워요",
            "hello there",
            "Hi!",
            "thank you so much",
            "넌 누구야?",
            "도움말",
            "bye",
        ] {
            assert!(intent.is_smalltalk(q), "should be smalltalk: {}", q);
        }
    }

    #[test]
    fn test_smalltalk_non_matches() {
        let intent = IntentClassifier::new();
        for q in [
            "RAG가 뭐야?",
            "3분기 매출 표를 보여줘",
            "highway construction budget",
            "보고서 요약해줘",
        ] {
            assert!(!intent.is_smalltalk(q), "should not be smalltalk: {}", q);
        }
    }

    #[tokio::test]
    async fn test_table_keywords_short_circuit() {
        let intent = IntentClassifier::new();
        // The scripted generator says plain, but keywords win without a call
        let gen = Scripted("plain");
        for q in ["3분기 매출 표를 보여줘", "what is the sum of column B", "평균이 얼마야"] {
            assert_eq!(
                intent.classify_document_intent(&gen, q).await,
                DocIntent::Table,
                "keyword route failed: {}",
                q
            );
        }
    }

    #[tokio::test]
    async fn test_classifier_fallback_to_model() {
        let intent = IntentClassifier::new();
        assert_eq!(
            intent
                .classify_document_intent(&Scripted("table"), "저 문서의 수입 내역 알려줘")
                .await,
            DocIntent::Table
        );
        assert_eq!(
            intent
                .classify_document_intent(&Scripted("plain"), "정책 요약해줘")
                .await,
            DocIntent::Plain
        );
    }
}
