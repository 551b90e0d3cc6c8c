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

//! Replaces non-breaking spaces (U+00A0) in names with ordinary spaces.
//!
//! Names pasted through the web interface tend to pick them up, which breaks
//! searching by name. Besides device, variable and flow names, flow cards
//! that point at another flow or at a variable carry a copy of its name in
//! their arguments; those copies are cleaned too.

use crate::model::{Card, CardKind, Flow};
use serde_json::{Map, Value};
use std::fmt;

pub const NBSP: char = '\u{a0}';

const FLOW_CARD_PREFIX: &str = "homey:manager:flow:";
const VARIABLE_CARD_PREFIX: &str = "homey:manager:logic:variable";

/// The cleaned text, or `None` when there is nothing to replace.
pub fn normalize(text: &str) -> Option<String> {
    text.contains(NBSP).then(|| text.replace(NBSP, " "))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    pub id: String,
    pub old: String,
    pub new: String,
}

/// Renames for every `(id, name)` pair that contains a non-breaking space.
pub fn renames<'a>(items: impl IntoIterator<Item = (&'a str, &'a str)>) -> Vec<Rename> {
    items
        .into_iter()
        .filter_map(|(id, name)| {
            normalize(name).map(|new| Rename {
                id: id.to_string(),
                old: name.to_string(),
                new,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Flow,
    Variable,
}

impl Target {
    fn arg(self) -> &'static str {
        match self {
            Target::Flow => "flow",
            Target::Variable => "variable",
        }
    }

    fn for_card(card_id: &str) -> Option<Self> {
        if card_id.starts_with(FLOW_CARD_PREFIX) {
            Some(Target::Flow)
        } else if card_id.starts_with(VARIABLE_CARD_PREFIX) {
            Some(Target::Variable)
        } else {
            None
        }
    }
}

/// A name copy inside a card argument that was cleaned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceFix {
    pub kind: CardKind,
    pub target: Target,
    pub old: String,
    pub new: String,
}

impl ReferenceFix {
    pub fn describe(&self, flow_name: &str) -> String {
        let subject = match self.target {
            Target::Flow => "Flow",
            Target::Variable => "Variable",
        };
        let verb = match (self.kind, self.target) {
            (CardKind::Trigger, _) => "triggered by",
            (CardKind::Condition, _) => "checked in",
            (CardKind::Action, Target::Flow) => "called in",
            (CardKind::Action, Target::Variable) => "set in",
        };
        format!("{} {} {}: {} -> {}", subject, verb, flow_name, self.old, self.new)
    }
}

/// `changed of total` for one kind of name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub changed: usize,
    pub total: usize,
}

impl fmt::Display for Tally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {}", self.changed, self.total)
    }
}

/// What `normalize_flow` changed in one flow.
#[derive(Debug, Default)]
pub struct FlowScan {
    pub name: Option<Rename>,
    pub fixes: Vec<ReferenceFix>,
    pub examined: [usize; 3],
}

impl FlowScan {
    pub fn is_changed(&self) -> bool {
        self.name.is_some() || !self.fixes.is_empty()
    }

    fn touched(&self, kind: CardKind) -> bool {
        self.fixes.iter().any(|fix| fix.kind == kind)
    }

    /// Update body carrying only the parts of `flow` that changed.
    pub fn patch(&self, flow: &Flow) -> Option<Value> {
        if !self.is_changed() {
            return None;
        }
        let mut patch = Map::new();
        if self.name.is_some() {
            patch.insert("name".into(), Value::String(flow.name.clone()));
        }
        if self.touched(CardKind::Trigger) {
            patch.insert("trigger".into(), serde_json::to_value(&flow.trigger).ok()?);
        }
        if self.touched(CardKind::Condition) {
            patch.insert(
                "conditions".into(),
                serde_json::to_value(&flow.conditions).ok()?,
            );
        }
        if self.touched(CardKind::Action) {
            patch.insert("actions".into(), serde_json::to_value(&flow.actions).ok()?);
        }
        Some(Value::Object(patch))
    }
}

/// Cleans the flow name and the name copies in its cards, in place.
pub fn normalize_flow(flow: &mut Flow) -> FlowScan {
    let mut scan = FlowScan {
        name: normalize(&flow.name).map(|new| Rename {
            id: flow.id.clone(),
            old: flow.name.clone(),
            new,
        }),
        ..FlowScan::default()
    };
    if let Some(rename) = &scan.name {
        flow.name = rename.new.clone();
    }

    if let Some(trigger) = flow.trigger.as_mut() {
        normalize_card(trigger, CardKind::Trigger, &mut scan);
    }
    for condition in flow.conditions.iter_mut() {
        normalize_card(condition, CardKind::Condition, &mut scan);
    }
    for action in flow.actions.iter_mut() {
        normalize_card(action, CardKind::Action, &mut scan);
    }
    scan
}

fn normalize_card(card: &mut Card, kind: CardKind, scan: &mut FlowScan) {
    let Some(target) = Target::for_card(&card.id) else {
        return;
    };
    let Some(Value::String(name)) = card
        .args
        .as_mut()
        .and_then(|args| args.get_mut(target.arg()))
        .and_then(Value::as_object_mut)
        .and_then(|referenced| referenced.get_mut("name"))
    else {
        return;
    };
    if name.is_empty() {
        return;
    }

    scan.examined[kind_index(kind)] += 1;
    if let Some(new) = normalize(name) {
        scan.fixes.push(ReferenceFix {
            kind,
            target,
            old: std::mem::replace(name, new.clone()),
            new,
        });
    }
}

pub fn kind_index(kind: CardKind) -> usize {
    match kind {
        CardKind::Trigger => 0,
        CardKind::Condition => 1,
        CardKind::Action => 2,
    }
}
