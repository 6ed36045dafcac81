use std::fmt;

/// Connection state of the single practice session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    /// A new session may start from here.
    pub fn can_start(self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Error)
    }

    pub fn is_active(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }

    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            // stop() is legal from anywhere
            (_, Disconnected) => true,
            (Disconnected | Error, Connecting) => true,
            (Connecting, Connected) => true,
            (_, Error) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Error => "Error",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionState::*;
    use super::*;

    #[test]
    fn happy_path_is_legal() {
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Disconnected));
    }

    #[test]
    fn no_overlapping_sessions() {
        assert!(!Connecting.can_transition_to(Connecting));
        assert!(!Connected.can_transition_to(Connecting));
        assert!(!Connecting.can_start());
        assert!(!Connected.can_start());
        assert!(Error.can_start());
        assert!(Error.can_transition_to(Connecting));
    }

    #[test]
    fn connected_requires_connecting() {
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Error.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Connected));
    }
}
