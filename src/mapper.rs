//! Element-mutation to tag mapping.
//!
//! Derives the set of tags that must be purged for a given content mutation,
//! and merges a drained batch of mutations into one deduplicated purge plan.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tags::Tag;

/// What happened to a content element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Save,
    Delete,
    Reorder,
}

/// Mutation descriptor delivered by the host application.
///
/// Optional fields are present only when the entity type carries that
/// relationship (a global set has no section, a flat section no structure).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementMutation {
    pub element_id: String,
    pub section_id: Option<String>,
    pub structure_id: Option<String>,
    pub operation: Operation,
}

impl ElementMutation {
    pub fn save(element_id: impl Into<String>) -> Self {
        Self {
            element_id: element_id.into(),
            section_id: None,
            structure_id: None,
            operation: Operation::Save,
        }
    }

    pub fn delete(element_id: impl Into<String>) -> Self {
        Self {
            operation: Operation::Delete,
            ..Self::save(element_id)
        }
    }

    pub fn reorder(structure_id: impl Into<String>) -> Self {
        Self {
            element_id: String::new(),
            section_id: None,
            structure_id: Some(structure_id.into()),
            operation: Operation::Reorder,
        }
    }

    pub fn in_section(mut self, section_id: impl Into<String>) -> Self {
        self.section_id = Some(section_id.into());
        self
    }

    pub fn in_structure(mut self, structure_id: impl Into<String>) -> Self {
        self.structure_id = Some(structure_id.into());
        self
    }
}

/// Derive the tags to purge for one mutation.
///
/// One tag per populated identifying field, in the fixed order element,
/// section, structure. The order is a tie-break convention for reproducible
/// logging only; callers union the result into a set.
///
/// A reorder touches every listing page that depends on the structure's
/// order, so it yields only the structure tag: one tag amortizes the
/// invalidation instead of one purge per moved element.
pub fn map_mutation(mutation: &ElementMutation) -> Vec<Tag> {
    if mutation.operation == Operation::Reorder {
        return mutation
            .structure_id
            .as_deref()
            .and_then(|id| Tag::structure(id).ok())
            .into_iter()
            .collect();
    }

    let mut tags = Vec::with_capacity(3);
    if let Ok(tag) = Tag::element(&mutation.element_id) {
        tags.push(tag);
    }
    if let Some(tag) = mutation
        .section_id
        .as_deref()
        .and_then(|id| Tag::section(id).ok())
    {
        tags.push(tag);
    }
    if let Some(tag) = mutation
        .structure_id
        .as_deref()
        .and_then(|id| Tag::structure(id).ok())
    {
        tags.push(tag);
    }
    tags
}

/// Deduplicated union of the tags for a batch of mutations.
///
/// Draining the event queue in batches lets a burst of saves against the same
/// section collapse into a single purge per tag.
#[derive(Debug, Default)]
pub struct PurgePlan {
    pub tags: HashSet<Tag>,
}

impl PurgePlan {
    pub fn from_mutations<'a>(mutations: impl IntoIterator<Item = &'a ElementMutation>) -> Self {
        let mut tags = HashSet::new();
        for mutation in mutations {
            tags.extend(map_mutation(mutation));
        }
        Self { tags }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

impl fmt::Display for PurgePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut canonical: Vec<&str> = self.tags.iter().map(Tag::canonical).collect();
        canonical.sort_unstable();
        write!(f, "purge[{}]", canonical.join(" "))
    }
}
