/// Job identifiers are opaque strings assigned by the job backend at
/// submission time.
pub type JobId = String;

/// The opaque token identifying one persistent client session,
/// supplied once at connection-handshake time.
pub type ConnectionToken = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
