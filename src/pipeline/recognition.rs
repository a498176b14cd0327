use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use time::{OffsetDateTime, format_description::BorrowedFormatItem, macros::format_description};

use crate::{
    broker::actions::BrokerPublisher,
    dispatch::{error::HandlerError, ports::TopicHandler},
    pipeline::{
        analyzer::Analyzer,
        classify::{Sentinels, classify, recorded_response},
        error::PipelineError,
        stage::stage_artifact,
    },
    record::RecordSink,
    types::{InboundMessage, OutcomeRecord, QoS},
};

const REQUEST_TIME_FORMAT: &[BorrowedFormatItem<'static>] = format_description!(
    "[weekday repr:short] [month repr:short] [day padding:space] [hour]:[minute]:[second] [year]"
);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub staging_path: PathBuf,
    pub result_topic: String,
    pub result_qos: QoS,
    pub sentinels: Sentinels,
    pub no_match_message: String,
}

impl PipelineSettings {
    /// Prefix the analyzer puts in front of every identity it reports.
    pub fn response_prefix(&self) -> String {
        format!("{},", self.staging_path.display())
    }
}

/// Handler for the image topic: stage, analyze, classify, publish, record.
pub struct RecognitionPipeline {
    settings: PipelineSettings,
    analyzer: Arc<dyn Analyzer>,
    publisher: BrokerPublisher,
    sink: Arc<dyn RecordSink>,
}

impl RecognitionPipeline {
    pub fn new(
        settings: PipelineSettings,
        analyzer: Arc<dyn Analyzer>,
        publisher: BrokerPublisher,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        Self {
            settings,
            analyzer,
            publisher,
            sink,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Runs one recognition for `payload`. Only staging and launch failures
    /// surface as errors.
    pub async fn run_once(&self, payload: &[u8]) -> Result<OutcomeRecord, PipelineError> {
        let request_time = request_timestamp();
        let settings = &self.settings;

        stage_artifact(&settings.staging_path, payload).await?;
        tracing::debug!(
            target: "pipeline",
            path = %settings.staging_path.display(),
            size_bytes = payload.len(),
            "artifact_staged"
        );

        let raw = self.analyzer.analyze(&settings.staging_path).await?;
        let classification = classify(&raw, &settings.sentinels);
        tracing::info!(
            target: "pipeline",
            matched = classification.is_match(),
            output_bytes = raw.len(),
            "analysis_classified"
        );

        let published = classification.published_text(&settings.no_match_message);
        let action_id = self
            .publisher
            .publish(
                &settings.result_topic,
                settings.result_qos,
                Bytes::copy_from_slice(published.as_bytes()),
            )
            .await;
        tracing::debug!(
            target: "pipeline",
            topic = %settings.result_topic,
            action_id = %action_id,
            "result_publish_issued"
        );

        let record = OutcomeRecord {
            request_time,
            response: recorded_response(
                &classification,
                &settings.response_prefix(),
                &settings.no_match_message,
            ),
        };
        if let Err(err) = self.sink.store(&record).await {
            tracing::warn!(
                target: "pipeline",
                error = %err,
                request_time = %record.request_time,
                "record_store_failed"
            );
        }

        Ok(record)
    }
}

#[async_trait]
impl TopicHandler for RecognitionPipeline {
    async fn handle(&self, message: &InboundMessage) -> Result<(), HandlerError> {
        self.run_once(&message.payload)
            .await
            .map(|_| ())
            .map_err(|err| HandlerError::new(message.topic.clone(), err.to_string()))
    }
}

/// Local wall-clock time in a ctime-like layout, e.g. `Mon Oct 19 17:21:05 2026`.
/// Falls back to UTC when the local offset is unavailable.
pub fn request_timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    format_request_time(now)
}

fn format_request_time(at: OffsetDateTime) -> String {
    at.format(REQUEST_TIME_FORMAT)
        .unwrap_or_else(|_| at.unix_timestamp().to_string())
}
