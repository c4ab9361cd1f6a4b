/// Locally generated identifier of a queue entry.
pub type JobId = uuid::Uuid;

/// Identifier assigned by the ingestion backend once a job is accepted.
pub type RemoteJobId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
