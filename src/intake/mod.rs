//! The intake entry point: one inbound channel message in, a triaged
//! ticket out.
//!
//! Ordering matters here. Identity resolution, ticket upsert and the thread
//! append are durable and must survive anything that happens later;
//! classification and KB matching sit behind them and degrade instead of
//! failing the call. The only error a channel adapter ever sees out of
//! `ingest` is a storage failure.

use crate::config::ClassifierConfig;
use crate::identity::IdentityResolver;
use crate::kb::{derive_keywords, KbMatcher, RankedArticle};
use crate::shared::enums::{Disposition, SenderType, TicketStatus};
use crate::shared::error::IntakeError;
use crate::shared::models::{NewTicket, Ticket, TicketTriage};
use crate::shared::utils::detect_language;
use crate::storage::Storage;
use crate::tickets::TicketStore;
use crate::triage::{Classifier, TriageAnnotator};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Channel-local identity of the person behind an inbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalUser {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
}

/// What a channel adapter delivers. `source_id` is the channel's own id for
/// the conversation and keys ticket idempotency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub source: String,
    pub source_id: String,
    pub external_user: ExternalUser,
    pub subject: Option<String>,
    pub body: String,
    pub language: Option<String>,
}

/// What `ingest` hands back to the channel adapter.
#[derive(Debug, Clone)]
pub struct IntakeOutcome {
    pub ticket: Ticket,
    pub triage: Option<TicketTriage>,
    pub kb_matches: Vec<RankedArticle>,
    pub thread_len: usize,
}

pub struct IntakeCoordinator {
    resolver: IdentityResolver,
    tickets: TicketStore,
    annotator: TriageAnnotator,
    matcher: KbMatcher,
    suggestion_limit: usize,
}

impl IntakeCoordinator {
    pub fn new(
        storage: Arc<dyn Storage>,
        classifier: Arc<dyn Classifier>,
        config: &ClassifierConfig,
    ) -> Self {
        Self {
            resolver: IdentityResolver::new(Arc::clone(&storage)),
            tickets: TicketStore::new(Arc::clone(&storage)),
            annotator: TriageAnnotator::new(classifier, config),
            matcher: KbMatcher::new(storage),
            suggestion_limit: 3,
        }
    }

    pub async fn ingest(&self, message: InboundMessage) -> Result<IntakeOutcome, IntakeError> {
        let user = self
            .resolver
            .resolve(
                &message.source,
                &message.external_user.id,
                &message.external_user.name,
                message.external_user.email.as_deref(),
            )
            .await?;

        let language = message
            .language
            .clone()
            .unwrap_or_else(|| detect_language(&message.body).to_string());
        let subject = message
            .subject
            .clone()
            .unwrap_or_else(|| subject_from_body(&message.body));

        let (ticket, is_new) = self
            .tickets
            .upsert_ticket(NewTicket {
                source: message.source.clone(),
                source_id: message.source_id.clone(),
                user_id: user.id,
                subject,
                body: message.body.clone(),
                language,
            })
            .await?;

        // Channel re-delivery guard: drop only an exact repeat of the
        // latest thread entry from the same sender.
        let duplicate = match self.tickets.last_message(ticket.id).await? {
            Some(last) => {
                last.sender_id == user.id
                    && last.sender_type == SenderType::User
                    && last.content == message.body
            }
            None => false,
        };
        if duplicate {
            debug!("suppressing duplicate delivery for ticket {}", ticket.id);
        } else {
            self.tickets
                .append_message(ticket.id, user.id, SenderType::User, &message.body)
                .await?;
        }

        let mut triage = self.tickets.get_triage(ticket.id).await?;
        let mut kb_matches = Vec::new();
        if is_new || triage.is_none() {
            let mut fresh = self.annotator.annotate(&ticket).await;
            kb_matches = self.suggest(&ticket, &fresh).await;
            let suggestion = render_suggestion(&kb_matches, &ticket.language, &fresh.summary);
            fresh.suggested_response = suggestion;
            match self.tickets.set_triage(ticket.id, fresh.clone()).await {
                Ok(_) => triage = Some(fresh),
                Err(IntakeError::TicketClosed(_)) => {
                    warn!(
                        "ticket {} reached a terminal status before triage was stored",
                        ticket.id
                    );
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(current) = &triage {
            if current.disposition == Disposition::Escalate {
                self.escalate(ticket.id).await;
            }
        }

        let ticket = self.tickets.get_ticket(ticket.id).await?;
        let thread_len = self.tickets.thread_len(ticket.id).await?;
        info!(
            "ingested {}:{} as ticket {} (status {}, thread {})",
            message.source, message.source_id, ticket.id, ticket.status, thread_len
        );
        Ok(IntakeOutcome {
            ticket,
            triage,
            kb_matches,
            thread_len,
        })
    }

    /// KB lookup feeding the suggested response. A storage failure here is
    /// logged and swallowed: suggestions are an enrichment, not intake.
    async fn suggest(&self, ticket: &Ticket, triage: &TicketTriage) -> Vec<RankedArticle> {
        let text = format!("{} {}", ticket.subject, ticket.body);
        let keywords = derive_keywords(&text);
        match self
            .matcher
            .match_articles(&triage.category, &keywords, &ticket.language, self.suggestion_limit)
            .await
        {
            Ok(matches) => matches,
            Err(err) => {
                warn!("kb lookup failed for ticket {}: {err}", ticket.id);
                Vec::new()
            }
        }
    }

    async fn escalate(&self, ticket_id: Uuid) {
        match self.tickets.transition(ticket_id, TicketStatus::Escalated).await {
            Ok(_) => info!("ticket {ticket_id} escalated by triage disposition"),
            Err(IntakeError::InvalidTransition { from, to }) => {
                debug!("skipping escalation {from} -> {to} for ticket {ticket_id}")
            }
            Err(err) => warn!("escalation failed for ticket {ticket_id}: {err}"),
        }
    }
}

fn subject_from_body(body: &str) -> String {
    let first_line = body.lines().next().unwrap_or_default().trim();
    first_line.chars().take(80).collect()
}

/// Compose the operator-facing suggested response: the top article's body
/// in the ticket language (falling back to any localization), followed by
/// the matched article titles. Without matches the classifier summary
/// stands alone.
fn render_suggestion(matches: &[RankedArticle], language: &str, summary: &str) -> String {
    let Some(top) = matches.first() else {
        return summary.to_string();
    };

    let mut out = String::new();
    if let Some(body) = top.article.localized_body(language) {
        out.push_str(body);
    } else {
        out.push_str(summary);
    }

    let titles: Vec<&str> = matches
        .iter()
        .filter_map(|m| m.article.localized_title(language))
        .collect();
    if !titles.is_empty() {
        out.push_str("\n\nSee also: ");
        out.push_str(&titles.join("; "));
    }
    out
}
