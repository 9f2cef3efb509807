use std::fmt;

/// Host used when a node name carries no `@host` suffix.
pub const DEFAULT_HOST: &str = "localhost";

/// A distribution node name split into its alive part and host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeName {
    pub alive: String,
    pub host: String,
}

impl NodeName {
    pub fn new(alive: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            alive: alive.into(),
            host: host.into(),
        }
    }

    /// Split `alive@host`; a bare name gets [`DEFAULT_HOST`].
    pub fn parse(full: &str) -> Self {
        match full.split_once('@') {
            Some((alive, host)) if !host.is_empty() => Self::new(alive, host),
            Some((alive, _)) => Self::new(alive, DEFAULT_HOST),
            None => Self::new(full, DEFAULT_HOST),
        }
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.alive, self.host)
    }
}
