use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::record::Field;

/// Closed set of labels the entity source may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityLabel {
    PersonName,
    Major,
    Gpa,
}

impl EntityLabel {
    /// Map a raw model label onto the closed set. Unknown labels are ignored.
    pub fn from_model_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "STUDENT_NAME" | "PERSON_NAME" => Some(EntityLabel::PersonName),
            "MAJOR" => Some(EntityLabel::Major),
            "GPA" => Some(EntityLabel::Gpa),
            _ => None,
        }
    }

    /// The entity label whose candidates feed `field`.
    pub fn for_field(field: Field) -> Self {
        match field {
            Field::Name => EntityLabel::PersonName,
            Field::Major => EntityLabel::Major,
            Field::Gpa => EntityLabel::Gpa,
        }
    }
}

impl fmt::Display for EntityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityLabel::PersonName => write!(f, "person_name"),
            EntityLabel::Major => write!(f, "major"),
            EntityLabel::Gpa => write!(f, "gpa"),
        }
    }
}

/// At most one candidate string per label. The first insert for a label wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMap(BTreeMap<EntityLabel, String>);

impl EntityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a candidate unless the label already holds one.
    /// Returns `true` if the value was stored.
    pub fn insert_first(&mut self, label: EntityLabel, value: impl Into<String>) -> bool {
        if self.0.contains_key(&label) {
            return false;
        }
        self.0.insert(label, value.into());
        true
    }

    pub fn remove(&mut self, label: EntityLabel) -> Option<String> {
        self.0.remove(&label)
    }

    pub fn get(&self, label: EntityLabel) -> Option<&str> {
        self.0.get(&label).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(EntityLabel, S)> for EntityMap {
    fn from_iter<I: IntoIterator<Item = (EntityLabel, S)>>(iter: I) -> Self {
        let mut map = EntityMap::new();
        for (label, value) in iter {
            map.insert_first(label, value);
        }
        map
    }
}

/// Label-prefixed values found by the line-oriented pattern scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegexCandidates {
    pub name: Option<String>,
    pub major: Option<String>,
    pub gpa: Option<String>,
}

impl RegexCandidates {
    pub fn get(&self, field: Field) -> Option<&str> {
        match field {
            Field::Name => self.name.as_deref(),
            Field::Major => self.major.as_deref(),
            Field::Gpa => self.gpa.as_deref(),
        }
    }
}

/// Where a candidate value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Entity,
    Regex,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Entity => write!(f, "entity"),
            Source::Regex => write!(f, "regex"),
        }
    }
}
