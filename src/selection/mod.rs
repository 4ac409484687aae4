//! Bridge selection strategy family (spec §4.C, §4.D).

pub mod class_split;
pub mod region;
pub mod selector;
pub mod single;
pub mod split;
pub mod strategy;

pub use selector::BridgeSelector;
pub use strategy::{ConferenceBridgeProperties, ConferenceBridges, ParticipantProperties, SelectionStrategy};

use std::collections::HashMap;
use std::sync::Arc;

use crate::bridge::Bridge;

/// Build the set of regions a participant's requested region is
/// equivalent to, per the configured `regionGroups` (spec §4.D,
/// GLOSSARY "Region group"). Always includes the region itself.
pub fn equivalent_regions(region: &str, groups: &HashMap<String, Vec<String>>) -> Vec<String> {
    let mut out = vec![region.to_string()];
    if let Some(group) = groups.get(region) {
        for r in group {
            if !out.contains(r) {
                out.push(r.clone());
            }
        }
    }
    out
}

/// Whether `bridge` is overloaded for the purposes of selection in this
/// conference (spec §4.D): either intrinsically overloaded, or the
/// conference-level participant cap on this bridge has been hit.
pub fn is_overloaded_for_conference(
    bridge: &Arc<Bridge>,
    conference_bridges: &ConferenceBridges,
    max_bridge_participants: Option<u32>,
    now: std::time::Instant,
) -> bool {
    if bridge.is_overloaded(now) {
        return true;
    }
    if let Some(max) = max_bridge_participants {
        if max > 0 {
            if let Some(props) = conference_bridges.get(bridge.address()) {
                if props.participant_count >= max {
                    return true;
                }
            }
        }
    }
    false
}
