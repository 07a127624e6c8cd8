//! # View Serialization
//!
//! The JSON wire format for group views, used by the client `get_view`
//! RPC, bootstrap files, and the node HTTP API:
//!
//! ```json
//! {
//!   "members": [{"address": "...", "provider_id": 0}, ...],
//!   "metadata": {"key": "value", ...}
//! }
//! ```
//!
//! `members` is serialized in the view's internal sorted order and must be
//! present and non-empty when parsing. `metadata` keys are serialized in
//! sorted order; the field may be absent on input and is then treated as
//! empty. Output is compact JSON with no trailing whitespace, so identical
//! contents produce identical bytes on every replica.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::GroupError;
use crate::view::GroupView;

/// One member as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMember {
    /// Transport endpoint address.
    pub address: String,
    /// Provider id on that endpoint.
    pub provider_id: u16,
}

/// A serializable snapshot of a group view: membership and metadata only.
/// Per-member backend state never crosses the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireView {
    /// Members, sorted by `(address, provider_id)`.
    pub members: Vec<WireMember>,
    /// Group metadata. A `BTreeMap` so keys serialize in sorted order.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl WireView {
    /// Serializes to the compact canonical JSON form.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("wire view serialization cannot fail")
    }

    /// Parses and validates a serialized view. The `members` field must be
    /// present and non-empty; `metadata` may be absent.
    pub fn from_json(input: &str) -> Result<Self, GroupError> {
        let view: WireView = serde_json::from_str(input)
            .map_err(|e| GroupError::InvalidConfig(format!("invalid group view JSON: {e}")))?;
        if view.members.is_empty() {
            return Err(GroupError::InvalidConfig(
                "\"members\" must be present and non-empty".into(),
            ));
        }
        Ok(view)
    }

    /// Writes the view to a file. The content goes to a `.swp` sibling
    /// first and is renamed into place, so readers never observe a
    /// half-written view.
    pub fn write_to_file(&self, path: &Path) -> Result<(), GroupError> {
        let mut swap = path.as_os_str().to_owned();
        swap.push(".swp");
        let swap = std::path::PathBuf::from(swap);
        std::fs::write(&swap, self.to_json())
            .map_err(|e| GroupError::Other(format!("could not write {}: {e}", swap.display())))?;
        std::fs::rename(&swap, path).map_err(|e| {
            GroupError::Other(format!(
                "could not rename {} into {}: {e}",
                swap.display(),
                path.display()
            ))
        })
    }

    /// The digest this snapshot's content would carry in a live view.
    /// Purely content-derived, so a snapshot and the view it was taken
    /// from always agree.
    pub fn content_digest(&self) -> u64 {
        GroupView::<()>::from_wire(self, |_, _| ()).digest()
    }

    /// Sorts members into the canonical `(address, provider_id)` order.
    ///
    /// Views produced by this crate are always sorted; caller-supplied
    /// bootstrap views and hand-written seed files may not be. Anything
    /// that reads a positional index (the centralized backend's primary
    /// is index 0) must sort first, or different processes will disagree
    /// about who sits where.
    pub fn sort_members(&mut self) {
        self.members.sort_by(|a, b| {
            (a.address.as_str(), a.provider_id).cmp(&(b.address.as_str(), b.provider_id))
        });
    }

    /// Reads and validates a view from a file.
    pub fn read_from_file(path: &Path) -> Result<Self, GroupError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GroupError::InvalidArgument(format!("could not read {}: {e}", path.display())))?;
        Self::from_json(&content)
    }
}

impl<E> GroupView<E> {
    /// Snapshots membership and metadata into the wire representation.
    pub fn to_wire(&self) -> WireView {
        WireView {
            members: self
                .members()
                .iter()
                .map(|m| WireMember {
                    address: m.address.clone(),
                    provider_id: m.provider_id,
                })
                .collect(),
            metadata: self
                .metadata()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Builds a view from a wire snapshot, constructing each member's
    /// extra state with `mk_extra`.
    pub fn from_wire<F>(wire: &WireView, mut mk_extra: F) -> Self
    where
        F: FnMut(&str, u16) -> E,
    {
        let mut view = GroupView::new();
        for m in &wire.members {
            let extra = mk_extra(&m.address, m.provider_id);
            view.add_member(&m.address, m.provider_id, extra);
        }
        for (k, v) in &wire.metadata {
            view.set_metadata(k, v);
        }
        view
    }
}
