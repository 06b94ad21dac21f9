/// Prefix of every versioned API route.
pub const API_PREFIX: &str = "/api/v0";

/// Largest accepted request body. Submissions are small JSON documents.
pub const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

/// Trigger recorded on workflows started without an explicit one.
pub const DEFAULT_TRIGGER: &str = "manual";
