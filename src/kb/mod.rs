//! Knowledge-base matching.
//!
//! Ranking is a deterministic total order: exact category match dominates,
//! keyword overlap breaks within a category, content in the requested
//! language is a tie-break only (an article localized elsewhere is still a
//! candidate), and the article id settles exact ties so repeated calls over
//! an unchanged KB return the same sequence.

use crate::shared::error::StorageError;
use crate::shared::models::KbArticle;
use crate::storage::Storage;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct RankedArticle {
    pub article: KbArticle,
    pub category_match: bool,
    pub keyword_hits: usize,
    pub language_match: bool,
}

impl RankedArticle {
    fn rank_key(&self) -> (bool, usize, bool) {
        (self.category_match, self.keyword_hits, self.language_match)
    }
}

pub struct KbMatcher {
    storage: Arc<dyn Storage>,
}

impl KbMatcher {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn match_articles(
        &self,
        category: &str,
        keywords: &[String],
        language: &str,
        limit: usize,
    ) -> Result<Vec<RankedArticle>, StorageError> {
        let articles = self.storage.list_published_articles().await?;
        Ok(rank(articles, category, keywords, language, limit))
    }
}

/// Score and order candidate articles, keeping the top `limit`.
///
/// Articles with neither a category match nor a keyword hit are not
/// candidates; unpublished articles are dropped unconditionally.
pub fn rank(
    articles: Vec<KbArticle>,
    category: &str,
    keywords: &[String],
    language: &str,
    limit: usize,
) -> Vec<RankedArticle> {
    let wanted: HashSet<String> = keywords.iter().map(|k| k.to_lowercase()).collect();

    let mut ranked: Vec<RankedArticle> = articles
        .into_iter()
        .filter(|a| a.is_published)
        .filter_map(|article| {
            let category_match = article.category == category;
            let keyword_hits = article
                .keywords
                .iter()
                .filter(|k| wanted.contains(&k.to_lowercase()))
                .count();
            if !category_match && keyword_hits == 0 {
                return None;
            }
            let language_match = article.has_language(language);
            Some(RankedArticle {
                article,
                category_match,
                keyword_hits,
                language_match,
            })
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.rank_key()
            .cmp(&a.rank_key())
            .then_with(|| a.article.id.cmp(&b.article.id))
    });
    ranked.truncate(limit);
    ranked
}

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{L}\p{N}]{3,}").unwrap());

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "and", "for", "with", "not", "you", "this", "that", "have", "was", "are", "can",
        "его", "это", "как", "что", "при", "для", "или", "она", "они", "мне", "могу", "нет",
        "меня", "было", "если", "менің", "және", "емес",
    ]
    .into_iter()
    .collect()
});

const MAX_KEYWORDS: usize = 16;

/// Extract lookup keywords from ticket text: lowercase word tokens of three
/// or more characters, stop words removed, first occurrence order kept.
pub fn derive_keywords(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut seen = HashSet::new();
    let mut keywords = Vec::new();
    for token in WORD.find_iter(&lowered) {
        let word = token.as_str();
        if STOP_WORDS.contains(word) {
            continue;
        }
        if seen.insert(word.to_string()) {
            keywords.push(word.to_string());
            if keywords.len() == MAX_KEYWORDS {
                break;
            }
        }
    }
    keywords
}
