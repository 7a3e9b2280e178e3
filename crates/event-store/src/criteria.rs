use std::collections::BTreeSet;

use common::Tag;

use crate::Event;

/// One conjunctive filter: every required tag AND one of the allowed types.
///
/// An empty `allowed_types` set accepts any event type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventCriterion {
    required_tags: BTreeSet<Tag>,
    allowed_types: BTreeSet<String>,
}

impl EventCriterion {
    /// Returns true if the event carries every required tag and an allowed type.
    pub fn matches(&self, event: &Event) -> bool {
        self.matches_parts(&event.event_type, &event.tags)
    }

    /// Same as [`matches`](Self::matches) for callers holding only the parts.
    pub fn matches_parts(&self, event_type: &str, tags: &BTreeSet<Tag>) -> bool {
        (self.allowed_types.is_empty() || self.allowed_types.contains(event_type))
            && self.required_tags.is_subset(tags)
    }

    pub fn required_tags(&self) -> &BTreeSet<Tag> {
        &self.required_tags
    }

    pub fn allowed_types(&self) -> &BTreeSet<String> {
        &self.allowed_types
    }
}

/// Declarative event filter, a disjunction of [`EventCriterion`]s.
///
/// ```
/// use event_store::{EventCriteria, Tag};
///
/// let criteria = EventCriteria::either([
///     EventCriteria::having_tag(Tag::new("Bike", "b-1"))
///         .and_being_one_of_types(["BikeCreated", "BikeRemovedFromFleet"]),
///     EventCriteria::having_tag(Tag::new("Rental", "u-1"))
///         .and_being_one_of_types(["BikeRentalRequested"]),
/// ]);
/// assert_eq!(criteria.alternatives().len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventCriteria {
    alternatives: Vec<EventCriterion>,
}

impl EventCriteria {
    /// Criteria that match no event at all.
    pub fn none() -> Self {
        Self::default()
    }

    /// Criteria requiring a single tag, any event type.
    pub fn having_tag(tag: Tag) -> Self {
        Self::having_tags([tag])
    }

    /// Criteria requiring every given tag, any event type.
    pub fn having_tags(tags: impl IntoIterator<Item = Tag>) -> Self {
        Self {
            alternatives: vec![EventCriterion {
                required_tags: tags.into_iter().collect(),
                allowed_types: BTreeSet::new(),
            }],
        }
    }

    /// Criteria matching the given event types regardless of tags.
    pub fn of_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::having_tags([]).and_being_one_of_types(types)
    }

    /// Restricts every alternative to the given event types.
    pub fn and_being_one_of_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let types: BTreeSet<String> = types.into_iter().map(Into::into).collect();
        for alternative in &mut self.alternatives {
            alternative.allowed_types.extend(types.iter().cloned());
        }
        self
    }

    /// Logical OR of the given criteria. Nested disjunctions are flattened.
    pub fn either(criteria: impl IntoIterator<Item = EventCriteria>) -> Self {
        Self {
            alternatives: criteria
                .into_iter()
                .flat_map(|c| c.alternatives)
                .collect(),
        }
    }

    /// Adds another alternative.
    pub fn or(mut self, other: EventCriteria) -> Self {
        self.alternatives.extend(other.alternatives);
        self
    }

    /// Returns true if the event satisfies at least one alternative.
    pub fn matches(&self, event: &Event) -> bool {
        self.alternatives.iter().any(|c| c.matches(event))
    }

    /// Returns true if no event can ever match.
    pub fn is_none(&self) -> bool {
        self.alternatives.is_empty()
    }

    pub fn alternatives(&self) -> &[EventCriterion] {
        &self.alternatives
    }

    /// Every tag mentioned by any alternative, in canonical order.
    pub fn tags(&self) -> BTreeSet<Tag> {
        self.alternatives
            .iter()
            .flat_map(|c| c.required_tags.iter().cloned())
            .collect()
    }

    /// Every event type mentioned by any alternative, in canonical order.
    pub fn event_types(&self) -> BTreeSet<String> {
        self.alternatives
            .iter()
            .flat_map(|c| c.allowed_types.iter().cloned())
            .collect()
    }

    /// Canonical key identifying the consistency boundary of these criteria.
    ///
    /// Two criteria naming the same tag set share a key regardless of the
    /// order the tags were given in. Separators inside tag keys and values
    /// are backslash-escaped, so distinct tag sets never share a key.
    pub fn lock_key(&self) -> String {
        self.tags()
            .iter()
            .map(|tag| format!("{}:{}", escape_key_part(tag.key()), escape_key_part(tag.value())))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// [`lock_key`](Self::lock_key) prefixed with `scope`, e.g. an aggregate type.
    pub fn scoped_key(&self, scope: &str) -> String {
        format!("{}|{}", escape_key_part(scope), self.lock_key())
    }
}

fn escape_key_part(part: &str) -> String {
    let mut escaped = String::with_capacity(part.len());
    for c in part.chars() {
        if matches!(c, '\\' | ',' | ':' | '|') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl From<EventCriterion> for EventCriteria {
    fn from(criterion: EventCriterion) -> Self {
        Self {
            alternatives: vec![criterion],
        }
    }
}
