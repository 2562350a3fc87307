//! Ingest batch records and wire-format DTOs for `/ingestGateway`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Publication policy attached to a batch at admission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "batch_visibility", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

/// One accepted batch, owned by the ingest gateway until the downstream
/// worker processes it.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IngestBatchRecord {
    pub batch_id: Uuid,
    pub device_id: String,
    pub storage_path: String,
    pub count: i32,
    pub processed_at: Option<DateTime<Utc>>,
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
}

/// The outer envelope submitted to `/ingestGateway`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestBatchRequest {
    pub device_id: String,
    #[serde(default)]
    pub visibility: Option<Visibility>,
    pub points: Vec<IngestPoint>,
}

/// One measurement point within a batch.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct IngestPoint {
    pub device_id: String,
    #[validate(length(min = 1))]
    pub pollutant: String,
    pub value: f64,
    #[validate(length(min = 1))]
    pub unit: String,
    #[validate(range(min = -90.0, max = 90.0))]
    pub lat: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub lon: f64,
    #[serde(default)]
    pub altitude: Option<f64>,
    #[serde(default)]
    pub precision: Option<f64>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub flags: i64,
}

/// Response body for a successfully admitted batch.
#[derive(Debug, Clone, Serialize)]
pub struct IngestAcceptedResponse {
    pub batch_id: Uuid,
    pub storage_path: String,
    pub visibility: Visibility,
}

/// Event published to the Event Bus once a batch is recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestEvent {
    pub device_id: String,
    pub batch_id: Uuid,
    pub path: String,
    pub visibility: Visibility,
}
