//! Participant identity: opaque id, display name, color tag.

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Color tags handed out to local participants.
pub const COLOR_TAGS: [&str; 15] = [
    "#f87171", "#fb923c", "#facc15", "#a3e635", "#4ade80", "#34d399", "#2dd4bf", "#22d3ee",
    "#38bdf8", "#60a5fa", "#818cf8", "#a78bfa", "#c084fc", "#e879f9", "#f472b6",
];

/// Fallback color when a peer is known but announced no usable color.
pub const DEFAULT_COLOR_TAG: &str = "#718096";

/// One side of the session. Serialized as `{id, name, color}` inside wire messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(rename = "color")]
    pub color_tag: String,
}

impl Participant {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        color_tag: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            color_tag: color_tag.into(),
        }
    }

    /// Create the local participant: fresh id, given name, random color from [`COLOR_TAGS`].
    pub fn local(display_name: impl Into<String>) -> Self {
        let color = COLOR_TAGS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(DEFAULT_COLOR_TAG);
        Self::new(generate_id(), display_name, color)
    }
}

/// Generate an opaque identifier for participants, chat entries and transfers.
/// On the wire this is just a short string; uuid v4 makes collisions negligible.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_participant_has_palette_color() {
        let p = Participant::local("Alice");
        assert_eq!(p.display_name, "Alice");
        assert!(COLOR_TAGS.contains(&p.color_tag.as_str()));
        assert!(!p.id.is_empty());
    }

    #[test]
    fn ids_are_distinct() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
    }

    #[test]
    fn serializes_with_short_field_names() {
        let p = Participant::new("u1", "Bob", "#4ade80");
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": "u1", "name": "Bob", "color": "#4ade80"})
        );
    }
}
