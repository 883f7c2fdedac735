use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPhase {
    Connecting,
    Open,
    Closed,
}

impl ConnectionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionPhase::Connecting => "connecting",
            ConnectionPhase::Open => "open",
            ConnectionPhase::Closed => "closed",
        }
    }
}

/// Stream connection status. Written only by the connection manager; every
/// other component gets copies.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    pub retry_count: u32,
    pub last_error: Option<String>,
    /// Number of successful opens so far. A value above one means the current
    /// stream is a resumed session and may have missed events.
    pub opened_count: u64,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            phase: ConnectionPhase::Connecting,
            retry_count: 0,
            last_error: None,
            opened_count: 0,
        }
    }
}

impl ConnectionState {
    pub fn connecting(&mut self) {
        self.phase = ConnectionPhase::Connecting;
    }

    pub fn opened(&mut self) {
        self.phase = ConnectionPhase::Open;
        self.retry_count = 0;
        self.last_error = None;
        self.opened_count += 1;
    }

    /// Records a close and counts the reconnect attempt it schedules.
    pub fn closed(&mut self, error: Option<String>) {
        self.phase = ConnectionPhase::Closed;
        self.retry_count = self.retry_count.saturating_add(1);
        if error.is_some() {
            self.last_error = error;
        }
    }

    pub fn is_open(&self) -> bool {
        self.phase == ConnectionPhase::Open
    }

    pub fn is_resumed(&self) -> bool {
        self.opened_count > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_count_resets_on_open() {
        let mut state = ConnectionState::default();
        state.closed(Some("refused".to_string()));
        state.connecting();
        state.closed(None);
        assert_eq!(state.retry_count, 2);
        assert_eq!(state.last_error.as_deref(), Some("refused"));
        assert_eq!(state.phase, ConnectionPhase::Closed);

        state.opened();
        assert_eq!(state.retry_count, 0);
        assert!(state.last_error.is_none());
        assert!(state.is_open());
        assert!(!state.is_resumed());

        state.closed(None);
        state.opened();
        assert!(state.is_resumed());
    }
}
