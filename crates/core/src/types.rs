/// Primary keys owned by collaborators (users, sessions) are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// Generation jobs and the messages they produce share one UUID (v7, time ordered).
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
