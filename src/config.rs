//! Listener configuration.

/// Default reserved suffix marking link fields.
pub const DEFAULT_LINK_SUFFIX: &str = "Ref";

/// Configuration shared by every listener of one client.
#[derive(Clone, Debug)]
pub struct GraphConfig {
    /// Suffix a stored field name must carry to be followed as a link.
    /// Default: "Ref"
    pub link_suffix: String,

    /// Max buffered events per live query before new events are dropped.
    /// Default: 1000
    pub event_buffer_size: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            link_suffix: DEFAULT_LINK_SUFFIX.to_string(),
            event_buffer_size: 1000,
        }
    }
}

impl GraphConfig {
    /// Whether `key` names a link field: it ends with the suffix and has a
    /// non-empty stem.
    pub fn is_link_key(&self, key: &str) -> bool {
        key.len() > self.link_suffix.len() && key.ends_with(self.link_suffix.as_str())
    }

    /// Result key of a link field (`ownerRef` -> `owner`).
    pub fn strip_link_suffix<'a>(&self, key: &'a str) -> Option<&'a str> {
        if self.is_link_key(key) {
            Some(&key[..key.len() - self.link_suffix.len()])
        } else {
            None
        }
    }
}
