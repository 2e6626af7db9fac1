use serde::{Deserialize, Serialize};
use std::fmt;

/// `localhost` is the sentinel app URI used for messages that have not yet
/// crossed a real network boundary.
pub const LOCALHOST: &str = "localhost";

/// Addresses a single extension (or, with the narrower fields left `None`,
/// a graph or an app) inside the extension-graph topology.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub app_uri: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub graph_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub extension_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub extension_name: Option<String>,
}

impl Location {
    pub fn new(app_uri: impl Into<String>) -> Self {
        Self {
            app_uri: app_uri.into(),
            graph_id: None,
            extension_group: None,
            extension_name: None,
        }
    }

    pub fn localhost() -> Self {
        Self::new(LOCALHOST)
    }

    pub fn with_graph(mut self, graph_id: impl Into<String>) -> Self {
        self.graph_id = Some(graph_id.into());
        self
    }

    pub fn with_extension_group(mut self, group: impl Into<String>) -> Self {
        self.extension_group = Some(group.into());
        self
    }

    pub fn with_extension(mut self, name: impl Into<String>) -> Self {
        self.extension_name = Some(name.into());
        self
    }

    pub fn is_localhost(&self) -> bool {
        self.app_uri == LOCALHOST
    }

    /// A location names an extension only when graph and extension name are
    /// both present; an engine-level or app-level location leaves those unset.
    pub fn is_extension(&self) -> bool {
        self.graph_id.is_some() && self.extension_name.is_some()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.app_uri)?;
        if let Some(g) = &self.graph_id {
            write!(f, "/{g}")?;
        }
        if let Some(e) = &self.extension_name {
            write!(f, "/{e}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn localhost_sentinel() {
        let loc = Location::localhost();
        assert!(loc.is_localhost());
        assert!(!loc.is_extension());
    }

    #[test]
    fn extension_location_round_trips_through_json() {
        let loc = Location::localhost()
            .with_graph("g1")
            .with_extension("echo");
        let json = serde_json::to_string(&loc).unwrap();
        let back: Location = serde_json::from_str(&json).unwrap();
        assert_eq!(loc, back);
        assert!(back.is_extension());
    }

    #[test]
    fn display_omits_absent_segments() {
        let loc = Location::localhost();
        assert_eq!(loc.to_string(), "localhost");
    }
}
