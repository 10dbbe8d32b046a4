/// Longest accepted message body, in characters.
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 2000;

/// Page size when `get_chat_history` omits `limit`.
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// Hard cap on `limit`.
pub const DEFAULT_HISTORY_MAX_LIMIT: u32 = 100;

/// Gateway tunables. Loaded by the server from the environment.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub max_message_length: usize,
    pub history_default_limit: u32,
    pub history_max_limit: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            history_default_limit: DEFAULT_HISTORY_LIMIT,
            history_max_limit: DEFAULT_HISTORY_MAX_LIMIT,
        }
    }
}
