//! Emulator configuration.

/// Master key published for the local emulator.
pub const WELL_KNOWN_MASTER_KEY: &str =
    "C2y6yDjf5/R+ob0N8A7Cgv30VRDJIWEHLM+4QDU5DE2nQ9nDuVTqobD4b8mGGyPMbIZnqyMsEcaGQy67XIw/Jw==";

/// Emulator configuration.
#[derive(Debug, Clone)]
pub struct EmulatorConfig {
    /// Base64 master key accepted for elevated requests
    pub master_key: String,
    /// Request body read timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Default page size for feeds when the client sends none
    pub default_page_size: usize,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            master_key: WELL_KNOWN_MASTER_KEY.to_string(),
            request_timeout_ms: 5000,
            default_page_size: 100,
        }
    }
}
