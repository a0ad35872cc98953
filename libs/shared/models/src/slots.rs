use serde::{Deserialize, Serialize};

// ==============================================================================
// SLOT CATALOG
// ==============================================================================

/// One fixed interval of the clinic day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotDefinition {
    pub slot_id: String,
    pub label: String,
    pub is_limited: bool,
}

/// Versioned, ordered table of the daily slots. Summaries, holiday checks and
/// booking validation all join against the same instance.
#[derive(Debug, Clone)]
pub struct SlotCatalog {
    version: &'static str,
    slots: Vec<SlotDefinition>,
}

const STANDARD_VERSION: &str = "2024.1";

// (slot id, is limited). Labels are derived from the id.
const STANDARD_SLOTS: [(&str, bool); 15] = [
    ("1000-1045", false),
    ("1045-1130", false),
    ("1130-1215", false),
    ("1215-1300", false),
    ("1300-1345", false),
    ("1415-1500", false),
    ("1500-1545", false),
    ("1545-1630", false),
    ("1630-1715", false),
    ("1715-1800", false),
    ("0830-0915", true),
    ("0915-1000", true),
    ("1800-1845", true),
    ("1845-1930", true),
    ("1930-2015", true),
];

impl SlotCatalog {
    /// The catalog shipped with this release.
    pub fn standard() -> &'static SlotCatalog {
        static CATALOG: std::sync::OnceLock<SlotCatalog> = std::sync::OnceLock::new();
        CATALOG.get_or_init(|| {
            let slots = STANDARD_SLOTS
                .iter()
                .map(|(slot_id, is_limited)| SlotDefinition {
                    slot_id: slot_id.to_string(),
                    label: label_for(slot_id),
                    is_limited: *is_limited,
                })
                .collect();
            SlotCatalog { version: STANDARD_VERSION, slots }
        })
    }

    pub fn version(&self) -> &str {
        self.version
    }

    pub fn all_slots(&self) -> &[SlotDefinition] {
        &self.slots
    }

    pub fn get(&self, slot_id: &str) -> Option<&SlotDefinition> {
        self.slots.iter().find(|slot| slot.slot_id == slot_id)
    }

    /// Unknown ids are treated as normal tier.
    pub fn is_limited(&self, slot_id: &str) -> bool {
        self.get(slot_id).map(|slot| slot.is_limited).unwrap_or(false)
    }

    pub fn label(&self, slot_id: &str) -> Option<&str> {
        self.get(slot_id).map(|slot| slot.label.as_str())
    }

    pub fn normal_count(&self) -> usize {
        self.slots.iter().filter(|slot| !slot.is_limited).count()
    }

    pub fn limited_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_limited).count()
    }
}

// "1000-1045" -> "10:00 to 10:45"
fn label_for(slot_id: &str) -> String {
    match slot_id.split_once('-') {
        Some((start, end)) if start.len() == 4 && end.len() == 4 => format!(
            "{}:{} to {}:{}",
            &start[..2],
            &start[2..],
            &end[..2],
            &end[2..]
        ),
        _ => slot_id.to_string(),
    }
}
