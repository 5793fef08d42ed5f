use std::{collections::HashMap, fmt};

use serde::Deserialize;
use serde_json::Value;

use crate::session::scripts::ASSIGNED_KEY;

/// Stable identity of one logical review, independent of the handle object the
/// browser happened to issue for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ItemIdentity {
    /// Value of a DOM attribute the page itself assigns per item.
    Attribute(String),
    /// Key stamped on the node by the identify script the first time it was
    /// seen. Lives as long as the node does.
    Assigned(String),
    /// BLAKE3 of the rendered text, for nodes that carry no key at all.
    Content(String),
}

impl fmt::Display for ItemIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemIdentity::Attribute(v) => write!(f, "attr:{v}"),
            ItemIdentity::Assigned(v) => write!(f, "node:{v}"),
            ItemIdentity::Content(h) => write!(f, "text:{}", &h[..h.len().min(16)]),
        }
    }
}

#[derive(Deserialize, Default)]
struct Sighting {
    #[serde(default)]
    data: HashMap<String, String>,
    #[serde(default)]
    text: Option<String>,
}

impl ItemIdentity {
    /// Builds an identity from one sighting of [`crate::session::scripts::IDENTIFY`].
    ///
    /// Order of preference: the configured page attribute, then the stamped
    /// [`ASSIGNED_KEY`], then a hash of the text. Returns `None` for an element
    /// with none of these.
    pub fn from_sighting(sighting: Value, attribute: Option<&str>) -> Option<Self> {
        let sighting: Sighting = serde_json::from_value(sighting).unwrap_or_default();
        let value = |name: &str| {
            sighting
                .data
                .get(name)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        if let Some(v) = attribute.and_then(value) {
            return Some(ItemIdentity::Attribute(v));
        }
        if let Some(v) = value(ASSIGNED_KEY) {
            return Some(ItemIdentity::Assigned(v));
        }
        let text = sighting.text?;
        let norm = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if norm.is_empty() {
            return None;
        }
        Some(ItemIdentity::Content(blake3::hash(norm.as_bytes()).to_hex().to_string()))
    }
}

/// Every item seen during a run, in first-seen order. Entries are never removed.
#[derive(Debug)]
pub struct Registry<H> {
    index: HashMap<ItemIdentity, usize>,
    entries: Vec<(ItemIdentity, H)>,
}

impl<H> Default for Registry<H> {
    fn default() -> Self {
        Self {
            index: HashMap::new(),
            entries: Vec::new(),
        }
    }
}

impl<H> Registry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `identity` if unseen and returns whether it was new. A known
    /// identity keeps its slot but takes the fresher handle.
    pub fn register(&mut self, identity: ItemIdentity, handle: H) -> bool {
        if let Some(&i) = self.index.get(&identity) {
            self.entries[i].1 = handle;
            return false;
        }
        self.index.insert(identity.clone(), self.entries.len());
        self.entries.push((identity, handle));
        true
    }

    pub fn contains(&self, identity: &ItemIdentity) -> bool {
        self.index.contains_key(identity)
    }

    /// Swaps in a newer handle for a known identity; no-op otherwise.
    pub fn refresh(&mut self, identity: &ItemIdentity, handle: H) {
        if let Some(&i) = self.index.get(identity) {
            self.entries[i].1 = handle;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ItemIdentity, &H)> {
        self.entries.iter().map(|(id, h)| (id, h))
    }
}
