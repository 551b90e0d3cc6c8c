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

//! Broken-flow detection.
//!
//! A flow is broken when one of its cards no longer has a definition on the
//! hub, or when a card argument references a token nothing provides. Local
//! tokens come from the trigger card's definition; global tokens (written as
//! `owner|token` in arguments) come from the hub's flow-token listing, where
//! they are keyed as `owner:token`.

use crate::model::{Card, CardKind, Flow, FlowCard};
use anyhow::{Context, Result};
use rayon::prelude::*;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use thiserror::Error;

pub const DEFAULT_JOBS: usize = 8;

static TOKEN_REF: OnceLock<Regex> = OnceLock::new();

/// Looks up card definitions.
pub trait CardSource: Sync {
    fn card(&self, kind: CardKind, id: &str) -> Result<FlowCard>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokenReason {
    #[error("Missing Token: {0}")]
    MissingToken(String),
    #[error("{0}")]
    CardUnavailable(String),
}

/// Tokens a card may reference at a given point of the flow.
#[derive(Debug)]
pub struct TokenScope<'a> {
    local: HashSet<String>,
    global: &'a HashSet<String>,
}

impl<'a> TokenScope<'a> {
    pub fn new(global: &'a HashSet<String>) -> Self {
        Self {
            local: HashSet::new(),
            global,
        }
    }

    pub fn provide(&mut self, card: &FlowCard) {
        self.local
            .extend(card.tokens.iter().map(|token| token.id.clone()));
    }

    pub fn check(&self, reference: &str) -> Result<(), BrokenReason> {
        if reference.contains('|') {
            let id = reference.replacen('|', ":", 1);
            if self.global.contains(&id) || self.local.contains(&id) {
                return Ok(());
            }
            return Err(BrokenReason::MissingToken(id));
        }
        if self.local.contains(reference) {
            Ok(())
        } else {
            Err(BrokenReason::MissingToken(reference.to_string()))
        }
    }
}

/// Token references made by a card: its droptoken, then every `[[id]]` in its
/// string arguments.
pub fn token_references(card: &Card) -> Vec<String> {
    let pattern = TOKEN_REF.get_or_init(|| {
        Regex::new(r"\[\[(.*?)\]\]").expect("token reference pattern is valid")
    });
    let mut refs = Vec::new();
    if let Some(droptoken) = card.droptoken.as_deref().filter(|d| !d.is_empty()) {
        refs.push(droptoken.to_string());
    }
    for arg in card.string_args() {
        refs.extend(pattern.captures_iter(arg).map(|c| c[1].to_string()));
    }
    refs
}

/// Walks trigger, conditions and actions in order and stops at the first
/// problem.
pub fn check_flow(
    flow: &Flow,
    source: &impl CardSource,
    global: &HashSet<String>,
) -> Result<(), BrokenReason> {
    let mut scope = TokenScope::new(global);

    if let Some(trigger) = &flow.trigger {
        let definition = fetch(source, CardKind::Trigger, trigger)?;
        check_card(&scope, trigger)?;
        scope.provide(&definition);
    }
    for condition in &flow.conditions {
        fetch(source, CardKind::Condition, condition)?;
        check_card(&scope, condition)?;
    }
    for action in &flow.actions {
        fetch(source, CardKind::Action, action)?;
        check_card(&scope, action)?;
    }
    Ok(())
}

fn fetch(source: &impl CardSource, kind: CardKind, card: &Card) -> Result<FlowCard, BrokenReason> {
    source
        .card(kind, &card.id)
        .map_err(|err| BrokenReason::CardUnavailable(format!("{:#}", err)))
}

fn check_card(scope: &TokenScope<'_>, card: &Card) -> Result<(), BrokenReason> {
    token_references(card)
        .iter()
        .try_for_each(|reference| scope.check(reference))
}

/// Checks every flow on a pool of `jobs` threads. Broken flows are returned
/// in input order with `error` set.
pub fn find_broken(
    flows: Vec<Flow>,
    source: &impl CardSource,
    global: &HashSet<String>,
    jobs: usize,
) -> Result<Vec<Flow>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.max(1))
        .build()
        .context("building flow check pool")?;

    let verdicts: Vec<Option<BrokenReason>> = pool.install(|| {
        flows
            .par_iter()
            .map(|flow| {
                let verdict = check_flow(flow, source, global).err();
                if let Some(reason) = &verdict {
                    tracing::debug!(flow = %flow.name, %reason, "flow is broken");
                }
                verdict
            })
            .collect()
    });

    Ok(flows
        .into_iter()
        .zip(verdicts)
        .filter_map(|(mut flow, verdict)| {
            verdict.map(|reason| {
                flow.error = Some(reason.to_string());
                flow
            })
        })
        .collect())
}
