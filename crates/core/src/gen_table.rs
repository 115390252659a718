use std::fmt;
use std::pin::Pin;
use std::str::FromStr;

use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// `object` value carried by completion-chunk events.
pub const COMPLETION_CHUNK_OBJECT: &str = "gen_table.completion.chunk";
/// `object` value carried by references events.
pub const REFERENCES_OBJECT: &str = "gen_table.references";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TableType {
    Action,
    Knowledge,
    Chat,
}

impl TableType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableType::Action => "action",
            TableType::Knowledge => "knowledge",
            TableType::Chat => "chat",
        }
    }
}

impl fmt::Display for TableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown table type: {0}")]
pub struct ParseTableTypeError(pub String);

impl FromStr for TableType {
    type Err = ParseTableTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "action" => Ok(TableType::Action),
            "knowledge" => Ok(TableType::Knowledge),
            "chat" => Ok(TableType::Chat),
            other => Err(ParseTableTypeError(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Function,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChatEntry {
    pub role: ChatRole,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChatCompletionChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<ChatEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<ChatEntry>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

impl ChatCompletionChoice {
    /// Text of this choice, preferring the streamed delta over the full message.
    pub fn text(&self) -> &str {
        self.delta
            .as_ref()
            .or(self.message.as_ref())
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletionUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// Partial generation output for one column of one row.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CellCompletionChunk {
    pub id: String,
    pub created: i64,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<CompletionUsage>,
    pub choices: Vec<ChatCompletionChoice>,
    pub output_column_name: String,
    pub row_id: String,
}

impl CellCompletionChunk {
    pub fn text(&self) -> &str {
        self.choices.first().map(|c| c.text()).unwrap_or("")
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.choices.first().and_then(|c| c.finish_reason.as_deref())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReferenceChunk {
    pub text: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub document_id: String,
    #[serde(default)]
    pub chunk_id: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
}

/// Retrieval citations produced while generating one column.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CellReferences {
    pub chunks: Vec<ReferenceChunk>,
    pub search_query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    pub output_column_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "object")]
pub enum GenTableStreamEvent {
    #[serde(rename = "gen_table.completion.chunk")]
    Chunk(CellCompletionChunk),
    #[serde(rename = "gen_table.references")]
    References(CellReferences),
}

impl GenTableStreamEvent {
    pub fn object(&self) -> &'static str {
        match self {
            GenTableStreamEvent::Chunk(_) => COMPLETION_CHUNK_OBJECT,
            GenTableStreamEvent::References(_) => REFERENCES_OBJECT,
        }
    }

    pub fn output_column_name(&self) -> &str {
        match self {
            GenTableStreamEvent::Chunk(c) => &c.output_column_name,
            GenTableStreamEvent::References(r) => &r.output_column_name,
        }
    }

    pub fn row_id(&self) -> Option<&str> {
        match self {
            GenTableStreamEvent::Chunk(c) => Some(&c.row_id),
            GenTableStreamEvent::References(r) => r.row_id.as_deref(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RowAddRequest {
    pub table_id: String,
    pub data: Vec<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reindex: Option<bool>,
    pub concurrent: bool,
}

impl RowAddRequest {
    pub fn new(
        table_id: impl Into<String>,
        data: Vec<serde_json::Map<String, serde_json::Value>>,
    ) -> Self {
        Self {
            table_id: table_id.into(),
            data,
            reindex: None,
            concurrent: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RegenStrategy {
    RunAll,
    RunSelected,
    RunBefore,
    RunAfter,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RowRegenRequest {
    pub table_id: String,
    pub row_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regen_strategy: Option<RegenStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_column_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reindex: Option<bool>,
    pub concurrent: bool,
}

impl RowRegenRequest {
    pub fn new(table_id: impl Into<String>, row_ids: Vec<String>) -> Self {
        Self {
            table_id: table_id.into(),
            row_ids,
            regen_strategy: None,
            output_column_id: None,
            reindex: None,
            concurrent: true,
        }
    }
}

/// CSV/TSV upload that is imported row by row, streaming generation results.
#[derive(Clone, Debug, PartialEq)]
pub struct TableImportRequest {
    pub table_id: String,
    pub file_name: String,
    pub data: Vec<u8>,
    pub delimiter: char,
}

impl TableImportRequest {
    pub fn new(table_id: impl Into<String>, file_name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            table_id: table_id.into(),
            file_name: file_name.into(),
            data,
            delimiter: ',',
        }
    }
}

/// A JSON payload whose `object` discriminator names no known event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unexpected stream event: {payload}")]
pub struct ChunkError {
    pub payload: String,
}

impl ChunkError {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum GenTableError {
    #[error("auth error: {0}")] Auth(String),
    #[error("rate limit: {0}")] RateLimit(String),
    #[error("not found: {0}")] NotFound(String),
    #[error("status {status}: {body}")] Status { status: u16, body: String },
    #[error("timeout: {0}")] Timeout(String),
    #[error("network: {0}")] Network(String),
    #[error("decode: {0}")] Decode(String),
    #[error(transparent)] Chunk(#[from] ChunkError),
    /// Transport failure mid-stream. The detail is kept for logs only.
    #[error("Unexpected Error")] Unexpected(String),
    #[error("other: {0}")] Other(String),
}

pub type GenTableStream<'a> =
    Pin<Box<dyn Stream<Item = Result<GenTableStreamEvent, GenTableError>> + Send + 'a>>;

#[allow(async_fn_in_trait)]
pub trait GenTableClient: Send + Sync {
    async fn add_row_stream<'a>(
        &'a self,
        table_type: TableType,
        req: RowAddRequest,
    ) -> Result<GenTableStream<'a>, GenTableError>;

    async fn regen_row_stream<'a>(
        &'a self,
        table_type: TableType,
        req: RowRegenRequest,
    ) -> Result<GenTableStream<'a>, GenTableError>;

    async fn import_table_data_stream<'a>(
        &'a self,
        table_type: TableType,
        req: TableImportRequest,
    ) -> Result<GenTableStream<'a>, GenTableError>;
}
