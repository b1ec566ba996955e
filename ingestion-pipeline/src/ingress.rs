use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            message::{Message, MessageType, NewMessage},
            pipeline_task::{PipelineTask, TaskStage},
        },
    },
};
use tracing::{debug, info};

use crate::export::ExportParser;

/// How identity collisions are handled on ingestion. The default treats
/// re-ingestion as a no-op so imports can be re-run safely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IngestMode {
    #[default]
    Upsert,
    Strict,
}

/// The stored record plus whether this call created it.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub message: Message,
    pub created: bool,
}

/// Bulk import result surfaced to the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportReport {
    pub imported: usize,
    pub total: usize,
    pub warnings: Vec<String>,
}

/// Normalize one raw message into the canonical record and queue enrichment.
///
/// A text message without content or attachment is rejected; media records
/// may be content-empty because the placeholder itself stands in for the
/// attachment that was not exported. An existing record with the same
/// identity is returned unchanged in `Upsert` mode (no re-enrichment) and is
/// a `DuplicateIdentity` error in `Strict` mode.
pub async fn ingest_message(
    db: &SurrealDbClient,
    new: NewMessage,
    mode: IngestMode,
) -> Result<IngestOutcome, AppError> {
    if new.content.is_empty()
        && new.attachment.is_none()
        && new.message_type == MessageType::Text
    {
        return Err(AppError::Validation(
            "message has neither content nor attachment".into(),
        ));
    }

    let identity = new.identity();
    if let Some(existing) = db.get_item::<Message>(&identity).await? {
        return match mode {
            IngestMode::Upsert => {
                debug!(message_id = %identity, "identity already ingested, returning existing record");
                Ok(IngestOutcome {
                    message: existing,
                    created: false,
                })
            }
            IngestMode::Strict => Err(AppError::DuplicateIdentity(identity)),
        };
    }

    let message = Message::from_new(new);
    let stored = db
        .store_item(message.clone())
        .await?
        .unwrap_or(message);

    PipelineTask::enqueue(db, &stored.id, TaskStage::Enrich).await?;
    debug!(message_id = %stored.id, "message ingested, enrichment queued");

    Ok(IngestOutcome {
        message: stored,
        created: true,
    })
}

/// Import a whole chat export. Parser warnings and per-message validation
/// failures are reported, not fatal; store failures abort the import so no
/// message is silently dropped.
pub async fn import_export(
    db: &SurrealDbClient,
    parser: &ExportParser,
    raw_text: &str,
    chat_label: &str,
) -> Result<ImportReport, AppError> {
    let outcome = parser.parse(raw_text, chat_label);

    let mut report = ImportReport {
        warnings: outcome.warnings,
        ..ImportReport::default()
    };

    for new in outcome.messages {
        report.total += 1;
        match ingest_message(db, new, IngestMode::Upsert).await {
            Ok(ingested) if ingested.created => report.imported += 1,
            Ok(_) => {}
            Err(AppError::Validation(reason)) => {
                report.warnings.push(format!("message skipped: {reason}"));
            }
            Err(other) => return Err(other),
        }
    }

    info!(
        chat = chat_label,
        imported = report.imported,
        total = report.total,
        warnings = report.warnings.len(),
        "chat export import finished"
    );

    Ok(report)
}
