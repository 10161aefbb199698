//! Classification consumers and the triage policy layer.
//!
//! The scoring service is opaque: anything that can turn ticket text into a
//! `Classification` plugs in behind the `Classifier` trait. The annotator
//! owns the policy around that call — a bounded timeout, the degraded
//! fallback when the service is unavailable, and the auto-resolve
//! confidence gate.

use crate::config::ClassifierConfig;
use crate::shared::enums::{Disposition, Priority};
use crate::shared::error::IntakeError;
use crate::shared::models::{Ticket, TicketTriage};
use async_trait::async_trait;
use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Raw output of the scoring service, one confidence per dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub category: String,
    pub category_conf: f64,
    pub priority: Priority,
    pub priority_conf: f64,
    pub disposition: Disposition,
    pub disposition_conf: f64,
    pub summary: String,
}

pub type ClassifierError = Box<dyn std::error::Error + Send + Sync>;

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str, language: &str)
        -> Result<Classification, ClassifierError>;
}

/// HTTP client for the hosted scoring service.
pub struct HttpClassifier {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpClassifier {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(
        &self,
        text: &str,
        language: &str,
    ) -> Result<Classification, ClassifierError> {
        let mut request = self
            .client
            .post(format!("{}/classify", self.base_url))
            .json(&serde_json::json!({ "text": text, "language": language }));
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(format!("classifier returned {}", response.status()).into());
        }
        let classification = response.json::<Classification>().await?;
        Ok(classification)
    }
}

/// Offline fallback used when no scoring endpoint is configured.
///
/// Categories come from a small keyword table; confidence grows with the
/// number of matched keywords but is deliberately kept below certainty.
pub struct KeywordClassifier;

const CATEGORY_RULES: &[(&str, &[&str])] = &[
    ("access_vpn", &["vpn", "впн"]),
    ("account_password", &["password", "пароль", "құпия"]),
    ("hardware_printer", &["printer", "принтер"]),
    ("email_access", &["email", "outlook", "почта"]),
];

const URGENCY_MARKERS: &[&str] = &["error", "ошибка", "critical", "не работает", "urgent"];

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(
        &self,
        text: &str,
        _language: &str,
    ) -> Result<Classification, ClassifierError> {
        let lowered = text.to_lowercase();

        let mut category = "general";
        let mut hits = 0usize;
        for (name, keywords) in CATEGORY_RULES {
            let matched = keywords.iter().filter(|k| lowered.contains(**k)).count();
            if matched > hits {
                category = *name;
                hits = matched;
            }
        }
        let category_conf = if hits == 0 {
            0.3
        } else {
            (0.55 + 0.15 * hits as f64).min(0.95)
        };

        let urgent = URGENCY_MARKERS.iter().any(|m| lowered.contains(m));
        let (priority, priority_conf) = if urgent {
            (Priority::High, 0.6)
        } else {
            (Priority::Medium, 0.5)
        };

        let summary = text.chars().take(140).collect::<String>();
        Ok(Classification {
            category: category.to_string(),
            category_conf,
            priority,
            priority_conf,
            disposition: Disposition::NeedsOperator,
            disposition_conf: if hits > 0 { 0.7 } else { 0.5 },
            summary,
        })
    }
}

/// Fixed-outcome classifier for tests and local development.
pub struct StaticClassifier {
    pub classification: Classification,
}

#[async_trait]
impl Classifier for StaticClassifier {
    async fn classify(
        &self,
        _text: &str,
        _language: &str,
    ) -> Result<Classification, ClassifierError> {
        Ok(self.classification.clone())
    }
}

pub struct TriageAnnotator {
    classifier: Arc<dyn Classifier>,
    timeout: Duration,
    auto_resolve_threshold: f64,
}

impl TriageAnnotator {
    pub fn new(classifier: Arc<dyn Classifier>, config: &ClassifierConfig) -> Self {
        Self {
            classifier,
            timeout: Duration::from_millis(config.timeout_ms),
            auto_resolve_threshold: config.auto_resolve_threshold,
        }
    }

    /// Produce a triage for the ticket. Never fails: a classifier error or
    /// timeout yields the degraded needs_operator annotation instead, so a
    /// ticket is never left without a triage record.
    pub async fn annotate(&self, ticket: &Ticket) -> TicketTriage {
        match self.classify_bounded(ticket).await {
            Ok(classification) => self.from_classification(ticket, classification),
            Err(err) => {
                warn!("{err}; storing degraded triage for ticket {}", ticket.id);
                self.degraded(ticket)
            }
        }
    }

    async fn classify_bounded(&self, ticket: &Ticket) -> Result<Classification, IntakeError> {
        let call = self.classifier.classify(&ticket.body, &ticket.language);
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(classification)) => Ok(classification),
            Ok(Err(err)) => Err(IntakeError::ClassificationUnavailable(err.to_string())),
            Err(_) => Err(IntakeError::ClassificationUnavailable(format!(
                "timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }

    fn from_classification(&self, ticket: &Ticket, c: Classification) -> TicketTriage {
        let mut disposition = c.disposition;
        if disposition == Disposition::AutoResolvable
            && c.disposition_conf < self.auto_resolve_threshold
        {
            info!(
                "downgrading auto_resolvable ({:.2} < {:.2}) for ticket {}",
                c.disposition_conf, self.auto_resolve_threshold, ticket.id
            );
            disposition = Disposition::NeedsOperator;
        }

        TicketTriage {
            ticket_id: ticket.id,
            category: c.category,
            category_conf: c.category_conf,
            priority: c.priority,
            priority_conf: c.priority_conf,
            disposition,
            disposition_conf: c.disposition_conf,
            summary: c.summary,
            suggested_response: String::new(),
            updated_at: Utc::now(),
        }
    }

    fn degraded(&self, ticket: &Ticket) -> TicketTriage {
        let summary = if ticket.subject.is_empty() {
            ticket.body.chars().take(120).collect()
        } else {
            ticket.subject.clone()
        };
        TicketTriage {
            ticket_id: ticket.id,
            category: "general".to_string(),
            category_conf: 0.0,
            priority: Priority::Medium,
            priority_conf: 0.0,
            disposition: Disposition::NeedsOperator,
            disposition_conf: 0.0,
            summary,
            suggested_response: String::new(),
            updated_at: Utc::now(),
        }
    }
}
