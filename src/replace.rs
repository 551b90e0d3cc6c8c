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

//! Swaps device ids inside flows after a device was removed and re-paired.

use crate::model::{AdvancedFlow, Card, CardKind, Flow};
use anyhow::{Context, Result};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::path::Path;
use std::{fmt, fs};
use thiserror::Error;

/// String arguments that may embed a device id.
const ID_ARGS: [&str; 3] = ["value", "text", "message"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MappingError {
    #[error("invalid mapping `{0}`, expected OLD=NEW")]
    Malformed(String),
    #[error("old device id `{0}` is mapped more than once")]
    Duplicate(String),
    #[error("no device ids to replace; pass --map OLD=NEW or --map-file")]
    Empty,
}

/// Old device id to new device id, applied in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdMapping {
    pairs: Vec<(String, String)>,
}

impl IdMapping {
    pub fn insert(&mut self, old: &str, new: &str) -> Result<(), MappingError> {
        let (old, new) = (old.trim(), new.trim());
        if old.is_empty() || new.is_empty() {
            return Err(MappingError::Malformed(format!("{}={}", old, new)));
        }
        if self.pairs.iter().any(|(o, _)| o == old) {
            return Err(MappingError::Duplicate(old.to_string()));
        }
        self.pairs.push((old.to_string(), new.to_string()));
        Ok(())
    }

    /// Parses one `OLD=NEW` command-line argument.
    pub fn insert_arg(&mut self, arg: &str) -> Result<(), MappingError> {
        let (old, new) = arg
            .split_once('=')
            .ok_or_else(|| MappingError::Malformed(arg.to_string()))?;
        self.insert(old, new)
    }

    /// Adds the pairs of a YAML mapping file (`old-id: new-id` per line).
    pub fn load_file(&mut self, path: &Path) -> Result<()> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
        let pairs: BTreeMap<String, String> =
            serde_yaml::from_str(&contents).with_context(|| format!("parsing {:?}", path))?;
        for (old, new) in pairs {
            self.insert(&old, &new)?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn ensure_non_empty(&self) -> Result<(), MappingError> {
        if self.is_empty() {
            Err(MappingError::Empty)
        } else {
            Ok(())
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(o, n)| (o.as_str(), n.as_str()))
    }
}

/// Where inside a flow a replacement happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Card(CardKind),
    AdvancedCard,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Card(kind) => write!(f, "{} card", kind),
            Location::AdvancedCard => f.write_str("card"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub location: Location,
    pub field: String,
    pub old_id: String,
    pub new_id: String,
}

/// Replaces every occurrence of each old id in `text`. Records one
/// replacement per mapping entry that matched.
fn substitute(
    text: &mut String,
    mapping: &IdMapping,
    location: Location,
    field: &str,
    found: &mut Vec<Replacement>,
) {
    for (old, new) in mapping.iter() {
        if text.contains(old) {
            *text = text.replace(old, new);
            found.push(Replacement {
                location,
                field: field.to_string(),
                old_id: old.to_string(),
                new_id: new.to_string(),
            });
        }
    }
}

fn substitute_opt(
    text: Option<&mut String>,
    mapping: &IdMapping,
    location: Location,
    field: &str,
    found: &mut Vec<Replacement>,
) {
    if let Some(text) = text {
        substitute(text, mapping, location, field, found);
    }
}

fn substitute_args(
    args: Option<&mut Map<String, Value>>,
    mapping: &IdMapping,
    location: Location,
    found: &mut Vec<Replacement>,
) {
    let Some(args) = args else {
        return;
    };
    for name in ID_ARGS {
        if let Some(Value::String(text)) = args.get_mut(name) {
            substitute(text, mapping, location, &format!("args.{}", name), found);
        }
    }
}

fn replace_in_card(
    card: &mut Card,
    kind: CardKind,
    mapping: &IdMapping,
    found: &mut Vec<Replacement>,
) {
    let location = Location::Card(kind);
    substitute_opt(card.uri.as_mut(), mapping, location, "uri", found);
    substitute(&mut card.id, mapping, location, "id", found);
    substitute_opt(card.droptoken.as_mut(), mapping, location, "droptoken", found);
    substitute_args(card.args.as_mut(), mapping, location, found);
}

/// Rewrites the cards of `flow` in place.
pub fn replace_in_flow(flow: &mut Flow, mapping: &IdMapping) -> Vec<Replacement> {
    let mut found = Vec::new();
    if let Some(trigger) = flow.trigger.as_mut() {
        replace_in_card(trigger, CardKind::Trigger, mapping, &mut found);
    }
    for condition in flow.conditions.iter_mut() {
        replace_in_card(condition, CardKind::Condition, mapping, &mut found);
    }
    for action in flow.actions.iter_mut() {
        replace_in_card(action, CardKind::Action, mapping, &mut found);
    }
    found
}

/// Rewrites the cards of an advanced flow in place.
pub fn replace_in_advanced_flow(flow: &mut AdvancedFlow, mapping: &IdMapping) -> Vec<Replacement> {
    let mut found = Vec::new();
    let location = Location::AdvancedCard;
    for card in flow.cards.values_mut() {
        substitute_opt(card.id.as_mut(), mapping, location, "id", &mut found);
        substitute_opt(card.owner_uri.as_mut(), mapping, location, "ownerUri", &mut found);
        substitute_opt(card.droptoken.as_mut(), mapping, location, "droptoken", &mut found);
        substitute_args(card.args.as_mut(), mapping, location, &mut found);
    }
    found
}

pub fn flow_patch(flow: &Flow) -> Value {
    json!({
        "trigger": flow.trigger,
        "conditions": flow.conditions,
        "actions": flow.actions,
    })
}

pub fn advanced_flow_patch(flow: &AdvancedFlow) -> Value {
    json!({ "cards": flow.cards })
}
