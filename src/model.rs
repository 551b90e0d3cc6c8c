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

//! Transient copies of the objects a Homey hub exposes.
//!
//! Every type keeps the fields it does not model in `extra`, so a value read
//! from the hub serializes back to the same JSON.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Listing endpoints answer with an object keyed by entity id. The hub's
/// order is kept.
pub type Listing<T> = IndexMap<String, T>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub driver_id: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub settings: Map<String, Value>,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repair: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unpair: Option<Value>,
    #[serde(default)]
    pub available: bool,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub warning_message: Option<String>,
    #[serde(default)]
    pub unavailable_message: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Zone {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A card instance placed in a flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Card {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub droptoken: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Card {
    /// String arguments in the order the hub sent them.
    pub fn string_args(&self) -> impl Iterator<Item = &str> {
        self.args
            .iter()
            .flat_map(|args| args.values())
            .filter_map(Value::as_str)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Flow {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Card>,
    #[serde(default)]
    pub conditions: Vec<Card>,
    #[serde(default)]
    pub actions: Vec<Card>,
    /// Set by the broken-flow check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdvancedFlow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub cards: IndexMap<String, AdvancedCard>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedCard {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub droptoken: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Variable {
    pub id: String,
    pub name: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub value: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CardKind {
    Trigger,
    Condition,
    Action,
}

impl CardKind {
    /// Path segment of the card definition endpoint.
    pub fn endpoint(self) -> &'static str {
        match self {
            CardKind::Trigger => "flowcardtrigger",
            CardKind::Condition => "flowcardcondition",
            CardKind::Action => "flowcardaction",
        }
    }
}

impl fmt::Display for CardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CardKind::Trigger => "trigger",
            CardKind::Condition => "condition",
            CardKind::Action => "action",
        })
    }
}

/// Definition of a flow card as registered on the hub.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FlowCard {
    #[serde(default)]
    pub id: String,
    #[serde(default, deserialize_with = "tokens_or_empty")]
    pub tokens: Vec<TokenDefinition>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenDefinition {
    pub id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// Cards without tokens report `null` or omit the field; some apps publish a
// map keyed by token id.
fn tokens_or_empty<'de, D>(deserializer: D) -> Result<Vec<TokenDefinition>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(match raw {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        Value::Object(map) => map
            .into_iter()
            .map(|(id, value)| TokenDefinition {
                id,
                extra: match value {
                    Value::Object(extra) => extra,
                    _ => Map::new(),
                },
            })
            .collect(),
        _ => Vec::new(),
    })
}
