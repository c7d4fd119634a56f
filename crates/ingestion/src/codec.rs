//! Flat string-map encoding of [`IngestionJob`].
//!
//! The status store keeps each job as a map of string fields (a Redis hash in
//! production). All coercion between that map and the typed record happens
//! here and nowhere else.
//!
//! | field                | encoding                                   |
//! |----------------------|--------------------------------------------|
//! | `metadata`           | JSON object string, missing = `{}`         |
//! | `created_at` etc.    | RFC 3339 UTC; naive ISO-8601 read as UTC   |
//! | `error_message`      | `""` = none                                |
//! | `retry_count` etc.   | decimal, missing = 0                       |

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use thiserror::Error;

use copilot_core::{DocumentId, JobId};

use crate::job::{BlobKey, IngestionJob, JobStatus, Metadata, StatusUpdate};

pub const FIELD_JOB_ID: &str = "job_id";
pub const FIELD_DOCUMENT_ID: &str = "document_id";
pub const FIELD_FILENAME: &str = "filename";
pub const FIELD_TITLE: &str = "title";
pub const FIELD_DEPARTMENT: &str = "department";
pub const FIELD_ACCESS_ROLE: &str = "access_role";
pub const FIELD_METADATA: &str = "metadata";
pub const FIELD_FILE_CONTENT_KEY: &str = "file_content_key";
pub const FIELD_STATUS: &str = "status";
pub const FIELD_CREATED_AT: &str = "created_at";
pub const FIELD_UPDATED_AT: &str = "updated_at";
pub const FIELD_ERROR_MESSAGE: &str = "error_message";
pub const FIELD_RETRY_COUNT: &str = "retry_count";
pub const FIELD_CHUNKS_CREATED: &str = "chunks_created";
pub const FIELD_PROCESSING_TIME_MS: &str = "processing_time_ms";

/// Errors raised while decoding a stored job.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl CodecError {
    fn invalid(field: &'static str, reason: impl ToString) -> Self {
        Self::InvalidField {
            field,
            reason: reason.to_string(),
        }
    }
}

/// Encode a full job record as field/value pairs.
pub fn encode(job: &IngestionJob) -> Vec<(&'static str, String)> {
    vec![
        (FIELD_JOB_ID, job.job_id.to_string()),
        (FIELD_DOCUMENT_ID, job.document_id.to_string()),
        (FIELD_FILENAME, job.filename.clone()),
        (FIELD_TITLE, job.title.clone()),
        (FIELD_DEPARTMENT, job.department.clone()),
        (FIELD_ACCESS_ROLE, job.access_role.clone()),
        (FIELD_METADATA, encode_metadata(&job.metadata)),
        (FIELD_FILE_CONTENT_KEY, job.blob_key.as_str().to_string()),
        (FIELD_STATUS, job.status.as_str().to_string()),
        (FIELD_CREATED_AT, encode_timestamp(job.created_at)),
        (FIELD_UPDATED_AT, encode_timestamp(job.updated_at)),
        (
            FIELD_ERROR_MESSAGE,
            job.error_message.clone().unwrap_or_default(),
        ),
        (FIELD_RETRY_COUNT, job.retry_count.to_string()),
        (FIELD_CHUNKS_CREATED, job.chunks_created.to_string()),
        (FIELD_PROCESSING_TIME_MS, job.processing_time_ms.to_string()),
    ]
}

/// Encode the fields touched by a partial status write.
pub fn encode_update(update: &StatusUpdate, now: DateTime<Utc>) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        (FIELD_STATUS, update.status.as_str().to_string()),
        (FIELD_UPDATED_AT, encode_timestamp(now)),
    ];

    if let Some(error) = &update.error_message {
        fields.push((FIELD_ERROR_MESSAGE, error.clone()));
    } else if update.clear_error {
        fields.push((FIELD_ERROR_MESSAGE, String::new()));
    }
    if let Some(chunks) = update.chunks_created {
        fields.push((FIELD_CHUNKS_CREATED, chunks.to_string()));
    }
    if let Some(ms) = update.processing_time_ms {
        fields.push((FIELD_PROCESSING_TIME_MS, ms.to_string()));
    }

    fields
}

/// Decode a stored field map into a typed job.
pub fn decode(fields: &HashMap<String, String>) -> Result<IngestionJob, CodecError> {
    let job_id = required(fields, FIELD_JOB_ID)?
        .parse::<JobId>()
        .map_err(|e| CodecError::invalid(FIELD_JOB_ID, e))?;
    let document_id = required(fields, FIELD_DOCUMENT_ID)?
        .parse::<DocumentId>()
        .map_err(|e| CodecError::invalid(FIELD_DOCUMENT_ID, e))?;
    let status = required(fields, FIELD_STATUS)?
        .parse::<JobStatus>()
        .map_err(|e| CodecError::invalid(FIELD_STATUS, e))?;

    let metadata = match fields.get(FIELD_METADATA).map(String::as_str) {
        None | Some("") => Metadata::new(),
        Some(raw) => serde_json::from_str(raw).map_err(|e| CodecError::invalid(FIELD_METADATA, e))?,
    };

    let error_message = fields
        .get(FIELD_ERROR_MESSAGE)
        .filter(|s| !s.is_empty())
        .cloned();

    Ok(IngestionJob {
        job_id,
        document_id,
        filename: required(fields, FIELD_FILENAME)?.to_string(),
        title: fields.get(FIELD_TITLE).cloned().unwrap_or_default(),
        department: fields.get(FIELD_DEPARTMENT).cloned().unwrap_or_default(),
        access_role: fields.get(FIELD_ACCESS_ROLE).cloned().unwrap_or_default(),
        metadata,
        blob_key: BlobKey::new(required(fields, FIELD_FILE_CONTENT_KEY)?),
        status,
        created_at: decode_timestamp(FIELD_CREATED_AT, required(fields, FIELD_CREATED_AT)?)?,
        updated_at: decode_timestamp(FIELD_UPDATED_AT, required(fields, FIELD_UPDATED_AT)?)?,
        error_message,
        retry_count: decode_number(fields, FIELD_RETRY_COUNT)?,
        chunks_created: decode_number(fields, FIELD_CHUNKS_CREATED)?,
        processing_time_ms: decode_number(fields, FIELD_PROCESSING_TIME_MS)?,
    })
}

fn required<'a>(fields: &'a HashMap<String, String>, name: &'static str) -> Result<&'a str, CodecError> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or(CodecError::MissingField(name))
}

pub fn encode_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn decode_timestamp(field: &'static str, raw: &str) -> Result<DateTime<Utc>, CodecError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| CodecError::invalid(field, e))
}

fn decode_number<T>(fields: &HashMap<String, String>, field: &'static str) -> Result<T, CodecError>
where
    T: core::str::FromStr + Default,
    T::Err: core::fmt::Display,
{
    match fields.get(field).map(|s| s.trim()) {
        None | Some("") => Ok(T::default()),
        Some(raw) => raw.parse().map_err(|e: T::Err| CodecError::invalid(field, e)),
    }
}

fn encode_metadata(metadata: &Metadata) -> String {
    serde_json::Value::Object(metadata.clone()).to_string()
}
