//! Topic construction and MQTT topic-filter matching
//!
//! Device topics are `{prefix}/{device_id}/command` and
//! `{prefix}/{device_id}/state`, with the prefix omitted when not configured.

/// Per-device reserved topics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTopics {
    command: String,
    state: String,
}

impl DeviceTopics {
    /// Build the reserved topics for a device
    pub fn new(device_id: &str, prefix: Option<&str>) -> Self {
        Self {
            command: build_device_topic(prefix, device_id, "command"),
            state: build_device_topic(prefix, device_id, "state"),
        }
    }

    /// Inbound command topic: `{prefix}/{id}/command`
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Outbound state topic: `{prefix}/{id}/state`
    pub fn state(&self) -> &str {
        &self.state
    }
}

fn build_device_topic(prefix: Option<&str>, device_id: &str, leaf: &str) -> String {
    match prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{prefix}/{device_id}/{leaf}"),
        None => format!("{device_id}/{leaf}"),
    }
}

/// Check whether a topic filter is well formed
///
/// `#` must be the whole last level; `+` must be a whole level.
pub fn is_valid_filter(filter: &str) -> bool {
    if filter.is_empty() || filter.contains('\0') {
        return false;
    }

    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;
    levels.iter().enumerate().all(|(i, level)| match *level {
        "#" => i == last,
        "+" => true,
        other => !other.contains('#') && !other.contains('+'),
    })
}

/// Match a concrete topic name against a topic filter
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    // Wildcards never match system topics starting with '$'
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
