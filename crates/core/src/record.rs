use serde::{Deserialize, Serialize};
use std::fmt;

/// The four fields a form extraction produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Name,
    Major,
    Gpa,
}

impl Field {
    pub const ALL: [Field; 3] = [Field::Name, Field::Major, Field::Gpa];
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Name => write!(f, "name"),
            Field::Major => write!(f, "major"),
            Field::Gpa => write!(f, "gpa"),
        }
    }
}

impl std::str::FromStr for Field {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "name" => Ok(Field::Name),
            "major" => Ok(Field::Major),
            "gpa" => Ok(Field::Gpa),
            other => Err(format!("Unknown field: '{other}'")),
        }
    }
}

/// Final extraction output. Every key is always present; a field that could
/// not be populated is the empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRecord {
    #[serde(rename = "STUDENT_FIRST_NAME", default)]
    pub first_name: String,
    #[serde(rename = "STUDENT_LAST_NAME", default)]
    pub last_name: String,
    #[serde(rename = "MAJOR", default)]
    pub major: String,
    #[serde(rename = "GPA", default)]
    pub gpa: String,
}

impl FieldRecord {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_empty()
            && self.last_name.is_empty()
            && self.major.is_empty()
            && self.gpa.is_empty()
    }

    /// Number of non-empty fields (0–4).
    pub fn populated(&self) -> usize {
        [&self.first_name, &self.last_name, &self.major, &self.gpa]
            .iter()
            .filter(|v| !v.is_empty())
            .count()
    }
}
