// homeyctl - CLI for the Homey local API
// Copyright (C) 2024 Mathias Uhl <mathiasuhl@gmx.de>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Zone tree with devices, rendered as an indented YAML-like report.

use crate::model::{Device, Listing, Zone};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt::Write;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ZoneTreeError {
    #[error("no root zone found (every zone has a parent)")]
    NoRoot,
    #[error("found {} root zones, expected exactly one: {}", .0.len(), .0.join(", "))]
    MultipleRoots(Vec<String>),
}

#[derive(Debug)]
pub struct ZoneNode<'a> {
    pub zone: &'a Zone,
    pub devices: Vec<&'a Device>,
    pub children: Vec<ZoneNode<'a>>,
}

/// Builds the tree below the single zone without a parent. Devices and
/// children are sorted by name, case-insensitively.
pub fn build_tree<'a>(
    zones: &'a Listing<Zone>,
    devices: &'a Listing<Device>,
) -> Result<ZoneNode<'a>, ZoneTreeError> {
    let mut devices_by_zone: HashMap<&str, Vec<&Device>> = HashMap::new();
    for device in devices.values() {
        let Some(zone_id) = device.zone.as_deref() else {
            continue;
        };
        if zones.contains_key(zone_id) {
            devices_by_zone.entry(zone_id).or_default().push(device);
        } else {
            tracing::warn!(device = %device.name, zone = zone_id, "device is in an unknown zone");
        }
    }

    let mut children_by_zone: HashMap<&str, Vec<&Zone>> = HashMap::new();
    let mut roots = Vec::new();
    for zone in zones.values() {
        match zone.parent.as_deref() {
            None => roots.push(zone),
            Some(parent) if zones.contains_key(parent) => {
                children_by_zone.entry(parent).or_default().push(zone)
            }
            Some(parent) => {
                tracing::warn!(zone = %zone.name, parent, "zone has an unknown parent")
            }
        }
    }

    let root = match roots.as_slice() {
        [] => return Err(ZoneTreeError::NoRoot),
        [root] => *root,
        many => {
            return Err(ZoneTreeError::MultipleRoots(
                many.iter().map(|z| z.name.clone()).collect(),
            ));
        }
    };

    let tree = assemble(root, &mut devices_by_zone, &mut children_by_zone);
    for zone in detached_zones(zones, &tree) {
        tracing::warn!(zone = %zone.name, "zone is not reachable from the root zone");
    }
    Ok(tree)
}

/// Zones with a known parent that the walk from the root never reaches,
/// which only happens when their parents form a cycle.
pub fn detached_zones<'a>(zones: &'a Listing<Zone>, root: &ZoneNode<'_>) -> Vec<&'a Zone> {
    let mut reached = HashSet::new();
    collect_ids(root, &mut reached);
    zones
        .values()
        .filter(|zone| {
            zone.parent
                .as_deref()
                .is_some_and(|parent| zones.contains_key(parent))
        })
        .filter(|zone| !reached.contains(zone.id.as_str()))
        .collect()
}

fn collect_ids<'a>(node: &ZoneNode<'a>, reached: &mut HashSet<&'a str>) {
    reached.insert(node.zone.id.as_str());
    for child in &node.children {
        collect_ids(child, reached);
    }
}

fn assemble<'a>(
    zone: &'a Zone,
    devices_by_zone: &mut HashMap<&'a str, Vec<&'a Device>>,
    children_by_zone: &mut HashMap<&'a str, Vec<&'a Zone>>,
) -> ZoneNode<'a> {
    let mut devices = devices_by_zone.remove(zone.id.as_str()).unwrap_or_default();
    devices.sort_by_cached_key(|d| (d.name.to_lowercase(), d.id.clone()));

    let mut child_zones = children_by_zone.remove(zone.id.as_str()).unwrap_or_default();
    child_zones.sort_by_cached_key(|z| (z.name.to_lowercase(), z.id.clone()));
    let children = child_zones
        .into_iter()
        .map(|child| assemble(child, devices_by_zone, children_by_zone))
        .collect();

    ZoneNode {
        zone,
        devices,
        children,
    }
}

pub fn render(root: &ZoneNode<'_>) -> String {
    let mut out = String::new();
    render_zone(&mut out, root, 0);
    out
}

fn render_zone(out: &mut String, node: &ZoneNode<'_>, indent: usize) {
    line(out, indent, &format!("{}:", node.zone.name));
    for device in &node.devices {
        render_device(out, device, indent + 2);
    }
    if !node.devices.is_empty() || node.children.is_empty() {
        out.push('\n');
    }
    for child in &node.children {
        render_zone(out, child, indent + 2);
    }
    if !node.children.is_empty() {
        out.push('\n');
    }
}

fn render_device(out: &mut String, device: &Device, indent: usize) {
    line(out, indent, &format!("{}:", device.name));
    let indent = indent + 2;
    line(out, indent, &format!("Id: {}", device.id));
    line(
        out,
        indent,
        &format!("Driver: {}", device.driver_id.as_deref().unwrap_or("")),
    );
    line(out, indent, &format!("Flags: {}", flags(device).join(",")));
    if !device.ready {
        line(out, indent, "Warning: Device not ready");
    }
    if let Some(msg) = non_empty(&device.warning_message) {
        line(out, indent, &format!("Warning: \"{}\"", msg));
    }
    if let Some(msg) = non_empty(&device.unavailable_message) {
        line(out, indent, &format!("Unavailable: \"{}\"", msg));
    }
    if let Some(note) = non_empty(&device.note) {
        line(out, indent, &format!("Note: {}", note));
    }
    if let Some(node_id) = device.settings.get("zw_node_id").filter(|v| truthy(v)) {
        line(out, indent, &format!("Z-Wave ID: {}", value_to_str(node_id)));
    }
}

fn flags(device: &Device) -> Vec<&str> {
    let mut flags: Vec<&str> = device.flags.iter().map(String::as_str).collect();
    if device.repair.as_ref().is_some_and(truthy) {
        flags.push("repair");
    }
    if device.unpair.as_ref().is_some_and(truthy) {
        flags.push("unpair");
    }
    if !device.available {
        flags.push("unavailable");
    }
    flags
}

fn line(out: &mut String, indent: usize, text: &str) {
    let _ = writeln!(out, "{:indent$}{}", "", text, indent = indent);
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn value_to_str(value: &Value) -> String {
    match value {
        Value::Null => "".into(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn listing<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Listing<T> {
        serde_json::from_value(value).unwrap()
    }

    fn sample() -> (Listing<Zone>, Listing<Device>) {
        let zones = listing(json!({
            "root": {"id": "root", "name": "Home", "parent": null},
            "z2": {"id": "z2", "name": "kitchen", "parent": "root"},
            "z3": {"id": "z3", "name": "Attic", "parent": "root"},
            "z4": {"id": "z4", "name": "Pantry", "parent": "z2"}
        }));
        let devices = listing(json!({
            "d1": {
                "id": "d1", "name": "Spot", "driverId": "homey:app:com.ikea:bulb",
                "zone": "z2", "available": true, "ready": true, "flags": [],
                "settings": {}
            },
            "d2": {
                "id": "d2", "name": "fridge sensor", "driverId": "homey:app:zwave:sensor",
                "zone": "z2", "available": false, "ready": false, "flags": ["zwave"],
                "unavailableMessage": "Battery empty", "note": "replace battery",
                "settings": {"zw_node_id": 12}
            },
            "d3": {
                "id": "d3", "name": "Door", "driverId": "homey:app:x:door",
                "zone": "z4", "available": true, "ready": true,
                "repair": true, "warningMessage": "Low signal", "settings": {}
            }
        }));
        (zones, devices)
    }

    #[test]
    fn renders_sorted_tree_with_device_details() {
        let (zones, devices) = sample();
        let tree = build_tree(&zones, &devices).unwrap();
        let expected = [
            "Home:",
            "  Attic:",
            "",
            "  kitchen:",
            "    fridge sensor:",
            "      Id: d2",
            "      Driver: homey:app:zwave:sensor",
            "      Flags: zwave,unavailable",
            "      Warning: Device not ready",
            "      Unavailable: \"Battery empty\"",
            "      Note: replace battery",
            "      Z-Wave ID: 12",
            "    Spot:",
            "      Id: d1",
            "      Driver: homey:app:com.ikea:bulb",
            "      Flags: ",
            "",
            "    Pantry:",
            "      Door:",
            "        Id: d3",
            "        Driver: homey:app:x:door",
            "        Flags: repair",
            "        Warning: \"Low signal\"",
            "",
            "",
            "",
            "",
        ]
        .join("\n");
        assert_eq!(render(&tree), expected);
    }

    #[test]
    fn report_is_stable_across_runs() {
        let (zones, devices) = sample();
        let first = render(&build_tree(&zones, &devices).unwrap());
        let second = render(&build_tree(&zones, &devices).unwrap());
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_missing_or_ambiguous_root() {
        let devices = Listing::new();
        let looped: Listing<Zone> = listing(json!({
            "a": {"id": "a", "name": "A", "parent": "b"},
            "b": {"id": "b", "name": "B", "parent": "a"}
        }));
        assert_eq!(build_tree(&looped, &devices).unwrap_err(), ZoneTreeError::NoRoot);

        let two: Listing<Zone> = listing(json!({
            "a": {"id": "a", "name": "A"},
            "b": {"id": "b", "name": "B"}
        }));
        assert_eq!(
            build_tree(&two, &devices).unwrap_err(),
            ZoneTreeError::MultipleRoots(vec!["A".into(), "B".into()])
        );
    }

    #[test]
    fn reports_zones_caught_in_a_parent_cycle() {
        let (mut zones, devices) = sample();
        for (id, name, parent) in [("ca", "Loop A", "cb"), ("cb", "Loop B", "ca")] {
            let zone: Zone =
                serde_json::from_value(json!({"id": id, "name": name, "parent": parent})).unwrap();
            zones.insert(id.into(), zone);
        }
        let tree = build_tree(&zones, &devices).unwrap();
        let detached: Vec<_> = detached_zones(&zones, &tree)
            .into_iter()
            .map(|z| z.name.as_str())
            .collect();
        assert_eq!(detached, vec!["Loop A", "Loop B"]);
        assert!(!render(&tree).contains("Loop"));
    }

    #[test]
    fn connected_zones_are_not_detached() {
        let (zones, devices) = sample();
        let tree = build_tree(&zones, &devices).unwrap();
        assert!(detached_zones(&zones, &tree).is_empty());
    }

    #[test]
    fn skips_devices_in_unknown_zones() {
        let (zones, mut devices) = sample();
        let stray: Device = serde_json::from_value(
            json!({"id": "d9", "name": "Stray", "zone": "nowhere", "available": true, "ready": true}),
        )
        .unwrap();
        devices.insert("d9".into(), stray);
        let report = render(&build_tree(&zones, &devices).unwrap());
        assert!(!report.contains("Stray"));
    }
}
