use deskserver::bootstrap;
use deskserver::config::{BootstrapConfig, ClassifierConfig};
use deskserver::intake::{ExternalUser, InboundMessage, IntakeCoordinator};
use deskserver::shared::enums::{Disposition, Priority, TicketStatus};
use deskserver::shared::state::AppState;
use deskserver::storage::{MemStorage, Storage};
use deskserver::triage::{Classification, Classifier, ClassifierError, StaticClassifier};
use async_trait::async_trait;
use std::sync::Arc;

fn telegram_message() -> InboundMessage {
    InboundMessage {
        source: "telegram".to_string(),
        source_id: "tg:123456".to_string(),
        external_user: ExternalUser {
            id: "987654321".to_string(),
            name: "Иван Петров".to_string(),
            email: None,
        },
        subject: None,
        body: "Здравствуйте! Не могу подключиться к VPN, ошибка 789. Помогите сбросить пароль."
            .to_string(),
        language: Some("ru".to_string()),
    }
}

fn vpn_classification() -> Classification {
    Classification {
        category: "access_vpn".to_string(),
        category_conf: 0.93,
        priority: Priority::High,
        priority_conf: 0.77,
        disposition: Disposition::NeedsOperator,
        disposition_conf: 0.7,
        summary: "User cannot connect to the VPN (error 789)".to_string(),
    }
}

struct FailingClassifier;

#[async_trait]
impl Classifier for FailingClassifier {
    async fn classify(
        &self,
        _text: &str,
        _language: &str,
    ) -> Result<Classification, ClassifierError> {
        Err("scoring service unreachable".into())
    }
}

async fn seeded_coordinator(
    classifier: Arc<dyn Classifier>,
) -> (IntakeCoordinator, Arc<MemStorage>) {
    let storage = Arc::new(MemStorage::new());
    bootstrap::run(
        storage.as_ref(),
        &BootstrapConfig {
            admin_email: "it@corp.local".to_string(),
            admin_name: "IT Helpdesk".to_string(),
            seed_kb: true,
        },
    )
    .await
    .expect("bootstrap");

    let coordinator = IntakeCoordinator::new(
        storage.clone() as Arc<dyn Storage>,
        classifier,
        &ClassifierConfig::default(),
    );
    (coordinator, storage)
}

#[tokio::test]
async fn telegram_vpn_report_ends_up_triaged_with_guidance() {
    let (coordinator, _) = seeded_coordinator(Arc::new(StaticClassifier {
        classification: vpn_classification(),
    }))
    .await;

    let outcome = coordinator.ingest(telegram_message()).await.unwrap();

    assert_eq!(outcome.ticket.status, TicketStatus::Triaged);
    assert_eq!(outcome.ticket.language, "ru");
    assert_eq!(outcome.thread_len, 1);

    let triage = outcome.triage.expect("triage stored");
    assert_eq!(triage.category, "access_vpn");
    assert!(!triage.suggested_response.is_empty());
    // the suggested response carries the VPN password reset guidance
    assert!(triage.suggested_response.contains("VPN"));
    assert!(triage.suggested_response.contains("пароль"));

    assert!(!outcome.kb_matches.is_empty());
    assert_eq!(outcome.kb_matches[0].article.category, "access_vpn");
}

#[tokio::test]
async fn redelivery_is_idempotent_on_ticket_and_thread() {
    let (coordinator, _) = seeded_coordinator(Arc::new(StaticClassifier {
        classification: vpn_classification(),
    }))
    .await;

    let first = coordinator.ingest(telegram_message()).await.unwrap();
    let second = coordinator.ingest(telegram_message()).await.unwrap();

    assert_eq!(first.ticket.id, second.ticket.id);
    assert_eq!(second.thread_len, 1);
}

#[tokio::test]
async fn follow_up_message_extends_the_thread() {
    let (coordinator, _) = seeded_coordinator(Arc::new(StaticClassifier {
        classification: vpn_classification(),
    }))
    .await;

    coordinator.ingest(telegram_message()).await.unwrap();
    let mut follow_up = telegram_message();
    follow_up.body = "Всё ещё не работает, код ошибки тот же.".to_string();
    let outcome = coordinator.ingest(follow_up).await.unwrap();

    assert_eq!(outcome.thread_len, 2);
}

#[tokio::test]
async fn classifier_outage_degrades_but_still_triages() {
    let (coordinator, _) = seeded_coordinator(Arc::new(FailingClassifier)).await;

    let outcome = coordinator.ingest(telegram_message()).await.unwrap();

    assert_eq!(outcome.ticket.status, TicketStatus::Triaged);
    assert_eq!(outcome.thread_len, 1);

    let triage = outcome.triage.expect("degraded triage stored");
    assert_eq!(triage.disposition, Disposition::NeedsOperator);
    assert_eq!(triage.disposition_conf, 0.0);
    assert_eq!(triage.category_conf, 0.0);
}

#[tokio::test]
async fn low_confidence_auto_resolve_is_stored_as_needs_operator() {
    let mut classification = vpn_classification();
    classification.disposition = Disposition::AutoResolvable;
    classification.disposition_conf = 0.5;
    let (coordinator, storage) = seeded_coordinator(Arc::new(StaticClassifier {
        classification,
    }))
    .await;

    let outcome = coordinator.ingest(telegram_message()).await.unwrap();
    let stored = storage
        .get_triage(outcome.ticket.id)
        .await
        .unwrap()
        .expect("triage stored");
    assert_eq!(stored.disposition, Disposition::NeedsOperator);
}

#[tokio::test]
async fn escalate_disposition_moves_ticket_to_escalated() {
    let mut classification = vpn_classification();
    classification.disposition = Disposition::Escalate;
    classification.disposition_conf = 0.9;
    let (coordinator, _) = seeded_coordinator(Arc::new(StaticClassifier {
        classification,
    }))
    .await;

    let outcome = coordinator.ingest(telegram_message()).await.unwrap();
    assert_eq!(outcome.ticket.status, TicketStatus::Escalated);
}

#[tokio::test]
async fn same_email_across_channels_resolves_to_one_user() {
    let (coordinator, storage) = seeded_coordinator(Arc::new(StaticClassifier {
        classification: vpn_classification(),
    }))
    .await;

    let mut portal = telegram_message();
    portal.source = "portal".to_string();
    portal.source_id = "case-900".to_string();
    portal.external_user = ExternalUser {
        id: "acc-17".to_string(),
        name: "Ivan Petrov".to_string(),
        email: Some("ivan@corp.local".to_string()),
    };

    let mut telegram = telegram_message();
    telegram.external_user.email = Some("ivan@corp.local".to_string());

    let first = coordinator.ingest(portal).await.unwrap();
    let second = coordinator.ingest(telegram).await.unwrap();

    assert_ne!(first.ticket.id, second.ticket.id);
    assert_eq!(first.ticket.user_id, second.ticket.user_id);

    let user = storage
        .find_user_by_email("ivan@corp.local")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.id, first.ticket.user_id);
}

#[tokio::test]
async fn concurrent_delivery_creates_exactly_one_ticket() {
    let (coordinator, _) = seeded_coordinator(Arc::new(StaticClassifier {
        classification: vpn_classification(),
    }))
    .await;
    let coordinator = Arc::new(coordinator);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let coordinator = Arc::clone(&coordinator);
        handles.push(tokio::spawn(async move {
            coordinator.ingest(telegram_message()).await.unwrap().ticket.id
        }));
    }
    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 1);
}

#[tokio::test]
async fn app_state_wires_a_working_coordinator() {
    let storage = Arc::new(MemStorage::new());
    bootstrap::run(
        storage.as_ref(),
        &BootstrapConfig {
            admin_email: "it@corp.local".to_string(),
            admin_name: "IT Helpdesk".to_string(),
            seed_kb: true,
        },
    )
    .await
    .unwrap();

    let config = deskserver::config::AppConfig {
        database: deskserver::config::DatabaseConfig {
            url: String::new(),
            pool_size: 1,
        },
        classifier: ClassifierConfig::default(),
        bootstrap: BootstrapConfig {
            admin_email: "it@corp.local".to_string(),
            admin_name: "IT Helpdesk".to_string(),
            seed_kb: true,
        },
    };
    let state = AppState::new(
        config,
        storage as Arc<dyn Storage>,
        Arc::new(StaticClassifier {
            classification: vpn_classification(),
        }),
    );

    let outcome = state.coordinator().ingest(telegram_message()).await.unwrap();
    assert_eq!(outcome.ticket.status, TicketStatus::Triaged);
}
