use std::time::Duration;

/// Tunables for the chat engine.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// How long a typing signal stays valid without a refresh.
    pub typing_timeout: Duration,
    /// How often expired typing entries are swept and announced.
    pub typing_sweep_interval: Duration,
    /// Maximum messages carried in a conversation snapshot.
    pub snapshot_limit: u32,
    /// Cap on the page size of a history request.
    pub max_page_size: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            typing_timeout: Duration::from_secs(3),
            typing_sweep_interval: Duration::from_secs(5),
            snapshot_limit: 200,
            max_page_size: 200,
        }
    }
}
