//! Topic construction and keyword matching
//!
//! Topics the agent derives from its configured root are canonicalized so a
//! root written as `agents/42/` or `/agents//42` still yields well-formed
//! filters. Topics received from the broker are never rewritten.

/// Suffix of the online/offline status topic under the root
pub const STATUS_SUFFIX: &str = "Status/Online";

/// Multi-level MQTT wildcard
pub const WILDCARD: &str = "#";

pub fn canonicalize_topic(topic: &str) -> String {
    if topic.is_empty() {
        return "/".to_string();
    }

    let mut result = if topic.starts_with('/') {
        topic.to_string()
    } else {
        format!("/{topic}")
    };

    while result.contains("//") {
        result = result.replace("//", "/");
    }

    if result.len() > 1 && result.ends_with('/') {
        result.pop();
    }

    result
}

/// Builders for the fixed topics the agent uses
pub struct TopicBuilder;

impl TopicBuilder {
    /// Wildcard filter covering the whole root subtree: `{root}/#`
    pub fn build_root_filter(root_topic: &str) -> String {
        let root = canonicalize_topic(root_topic);
        if root == "/" {
            format!("/{WILDCARD}")
        } else {
            format!("{root}/{WILDCARD}")
        }
    }

    /// Online/offline status topic: `{root}/Status/Online`
    pub fn build_status_topic(root_topic: &str) -> String {
        canonicalize_topic(&format!("{root_topic}/{STATUS_SUFFIX}"))
    }

    /// Filter for a topic announced by the broker at runtime: `{topic}/#`.
    /// The announced topic is used verbatim.
    pub fn build_child_filter(topic: &str) -> String {
        format!("{topic}/{WILDCARD}")
    }
}

/// Case-insensitive substring test used for command dispatch.
///
/// Matching is not segment-aware: `Command/Unlock` contains
/// `lock`, and `/a/lock` and `/b/blocked` both match the keyword `lock`.
pub fn contains_keyword(topic: &str, keyword: &str) -> bool {
    topic.to_lowercase().contains(&keyword.to_lowercase())
}
