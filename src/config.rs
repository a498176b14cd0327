use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    broker::session::SessionConfig,
    pipeline::{classify::Sentinels, recognition::PipelineSettings},
    types::QoS,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub broker: BrokerConfig,
    #[serde(default)]
    pub topics: TopicsConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub record_store: RecordStoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Directory of the loaded config file; relative locations resolve against it.
    #[serde(skip, default = "default_base_dir")]
    pub base_dir: PathBuf,
}

fn default_base_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_client_id() -> String {
    "Porichoy_Cloud".to_string()
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_enabled_true() -> bool {
    true
}

fn default_reconnect_delay_ms() -> u64 {
    2500
}

fn default_request_capacity() -> usize {
    10
}

fn default_inbound_queue_capacity() -> usize {
    16
}

fn default_image_topic() -> TopicConfig {
    TopicConfig {
        name: "Image".to_string(),
        qos: QoS::AtLeastOnce,
    }
}

fn default_result_topic() -> TopicConfig {
    TopicConfig {
        name: "Result".to_string(),
        qos: QoS::AtMostOnce,
    }
}

fn default_staging_path() -> PathBuf {
    PathBuf::from("temp.jpg")
}

fn default_analyzer_program() -> String {
    "face_recognition".to_string()
}

fn default_corpus_dir() -> PathBuf {
    PathBuf::from("./known_people")
}

fn default_no_match_message() -> String {
    "No match found".to_string()
}

fn default_record_uri() -> String {
    "file://./records".to_string()
}

fn default_record_collection() -> String {
    "responses".to_string()
}

fn default_logging_dir() -> PathBuf {
    PathBuf::from("./logs")
}

fn default_logging_filter() -> String {
    "info".to_string()
}

fn default_logging_rotation() -> LoggingRotation {
    LoggingRotation::Daily
}

fn default_logging_retention_days() -> usize {
    14
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub address: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_enabled_true")]
    pub clean_session: bool,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Capacity of the client request queue towards the event loop.
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,
    #[serde(default = "default_inbound_queue_capacity")]
    pub inbound_queue_capacity: usize,
}

impl BrokerConfig {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            address: self.address.clone(),
            client_id: self.client_id.clone(),
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            clean_session: self.clean_session,
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicConfig {
    pub name: String,
    pub qos: QoS,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicsConfig {
    #[serde(default = "default_image_topic")]
    pub image: TopicConfig,
    #[serde(default = "default_result_topic")]
    pub result: TopicConfig,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            image: default_image_topic(),
            result: default_result_topic(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    #[serde(default = "default_analyzer_program")]
    pub program: String,
    /// Arguments placed before the corpus directory and artifact path.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_corpus_dir")]
    pub corpus_dir: PathBuf,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            program: default_analyzer_program(),
            args: Vec::new(),
            corpus_dir: default_corpus_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_staging_path")]
    pub staging_path: PathBuf,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub sentinels: Sentinels,
    #[serde(default = "default_no_match_message")]
    pub no_match_message: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            staging_path: default_staging_path(),
            analyzer: AnalyzerConfig::default(),
            sentinels: Sentinels::default(),
            no_match_message: default_no_match_message(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordStoreConfig {
    #[serde(default = "default_record_uri")]
    pub uri: String,
    #[serde(default = "default_record_collection")]
    pub collection: String,
}

impl Default for RecordStoreConfig {
    fn default() -> Self {
        Self {
            uri: default_record_uri(),
            collection: default_record_collection(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LoggingRotation {
    Daily,
    Hourly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_logging_filter")]
    pub filter: String,
    #[serde(default = "default_logging_rotation")]
    pub rotation: LoggingRotation,
    #[serde(default = "default_logging_retention_days")]
    pub retention_days: usize,
    #[serde(default = "default_enabled_true")]
    pub stderr_warn_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_logging_dir(),
            filter: default_logging_filter(),
            rotation: default_logging_rotation(),
            retention_days: default_logging_retention_days(),
            stderr_warn_enabled: true,
        }
    }
}

impl Config {
    pub fn load(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        let config_value: Value = json5::from_str(&config_content)
            .with_context(|| format!("failed to parse {}", config_path.display()))?;

        let config_base = config_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let schema = load_schema(config_base, &config_value)?;
        validate_against_schema(&config_value, &schema)?;

        let mut config: Config =
            serde_json::from_value(config_value).context("failed to deserialize porichoy config")?;

        config.base_dir = config_base.to_path_buf();
        resolve_relative(&mut config.pipeline.staging_path, config_base);
        resolve_relative(&mut config.pipeline.analyzer.corpus_dir, config_base);
        resolve_relative(&mut config.logging.dir, config_base);

        Ok(config)
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            staging_path: self.pipeline.staging_path.clone(),
            result_topic: self.topics.result.name.clone(),
            result_qos: self.topics.result.qos,
            sentinels: self.pipeline.sentinels.clone(),
            no_match_message: self.pipeline.no_match_message.clone(),
        }
    }
}

fn resolve_relative(path: &mut PathBuf, base: &Path) {
    if !path.is_absolute() {
        *path = base.join(&*path);
    }
}

/// Schema compiled into the binary. A `$schema` path in the config replaces it.
const BUNDLED_SCHEMA: &str = include_str!("../porichoy.schema.json");

fn load_schema(config_base: &Path, config_value: &Value) -> Result<Value> {
    let Some(path_text) = config_value.get("$schema").and_then(Value::as_str) else {
        return serde_json::from_str(BUNDLED_SCHEMA)
            .context("failed to parse bundled config schema");
    };

    let schema_path = config_base.join(path_text);
    let schema_content = fs::read_to_string(&schema_path)
        .with_context(|| format!("failed to read schema {}", schema_path.display()))?;
    serde_json::from_str(&schema_content)
        .with_context(|| format!("failed to parse schema {}", schema_path.display()))
}

fn validate_against_schema(config_value: &Value, schema: &Value) -> Result<()> {
    let compiled = JSONSchema::compile(schema)
        .map_err(|err| anyhow!("failed to compile config schema: {err}"))?;
    if let Err(errors) = compiled.validate(config_value) {
        let messages: Vec<String> = errors
            .map(|error| format!("{} (at '{}')", error, error.instance_path))
            .collect();
        return Err(anyhow!("config validation failed: {}", messages.join("; ")));
    }
    Ok(())
}
