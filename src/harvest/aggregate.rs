//! Channel menu built from a batch of export headers.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::model::{ChannelDescriptor, HarvestRequest};
use crate::traits::HarvestError;

/// Selectable channels of a batch, as offered to the selection table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelMenu {
    /// Tags in first-seen order.
    pub tags: Vec<String>,
    /// Union of wavelength axes per scan tag; empty for single channels.
    pub grids: BTreeMap<String, Vec<f64>>,
    #[serde(default)]
    scan_tags: BTreeSet<String>,
}

impl ChannelMenu {
    /// Merges descriptors sharing a tag. Scan grids are unioned with exact
    /// duplicates collapsed; first-seen value order is kept.
    pub fn aggregate<'a, I>(descriptors: I) -> Self
    where
        I: IntoIterator<Item = &'a ChannelDescriptor>,
    {
        let mut menu = ChannelMenu::default();
        let mut seen: BTreeMap<String, HashSet<u64>> = BTreeMap::new();

        for descriptor in descriptors {
            let tag = &descriptor.tag;
            if !menu.grids.contains_key(tag) {
                menu.tags.push(tag.clone());
                menu.grids.insert(tag.clone(), Vec::new());
            }
            if !descriptor.is_scan {
                continue;
            }
            menu.scan_tags.insert(tag.clone());

            let bits = seen.entry(tag.clone()).or_default();
            if let Some(grid) = menu.grids.get_mut(tag) {
                for &value in &descriptor.wavelength_grid {
                    // -0.0 and 0.0 collapse together.
                    if bits.insert((value + 0.0).to_bits()) {
                        grid.push(value);
                    }
                }
            }
        }
        menu
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.grids.contains_key(tag)
    }

    pub fn is_scan(&self, tag: &str) -> bool {
        self.scan_tags.contains(tag)
    }

    pub fn grid(&self, tag: &str) -> Option<&[f64]> {
        self.grids.get(tag).map(Vec::as_slice)
    }

    /// Checks a request against the menu: the tag must exist, and scan
    /// channels need a target.
    pub fn validate(&self, request: &HarvestRequest) -> Result<(), HarvestError> {
        let invalid = |reason: String| HarvestError::InvalidRequest {
            compound: request.compound.clone(),
            reason,
        };
        if !self.contains(&request.channel_tag) {
            return Err(invalid(format!("unknown channel '{}'", request.channel_tag)));
        }
        if self.is_scan(&request.channel_tag) && request.target.is_none() {
            return Err(invalid(format!("channel '{}' needs a target", request.channel_tag)));
        }
        Ok(())
    }
}
