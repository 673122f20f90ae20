use std::collections::HashMap;
use std::str::FromStr;
use std::sync::OnceLock;

use autoform_core::{EntityLabel, EntityMap, Field, FieldRecord, RegexCandidates, ResolverConfig, Source};
use regex::Regex;
use rust_decimal::Decimal;
use serde::Serialize;

fn re_role_label() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| {
        Regex::new(r"(?i)^(?:name|student|candidate)\b\s*[:.\-]?\s*").expect("invalid regex")
    })
}

// ── Strategy table ────────────────────────────────────────────────────────────

/// How one field is resolved: the sources to consult, in order, and whether a
/// candidate that fails final validation lets the next source try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldStrategy {
    pub field: Field,
    pub sources: &'static [Source],
    pub fallthrough_on_invalid: bool,
}

pub const STRATEGIES: [FieldStrategy; 3] = [
    FieldStrategy {
        field: Field::Name,
        sources: &[Source::Entity, Source::Regex],
        fallthrough_on_invalid: true,
    },
    FieldStrategy {
        field: Field::Major,
        sources: &[Source::Entity, Source::Regex],
        fallthrough_on_invalid: true,
    },
    // The regex reads decimal numbers more reliably than the tagger. Once a
    // GPA is chosen it either validates or the field stays empty.
    FieldStrategy {
        field: Field::Gpa,
        sources: &[Source::Regex, Source::Entity],
        fallthrough_on_invalid: false,
    },
];

// ── Trace ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    Missing,
    TooShort { min: usize },
    Denylisted { token: String },
    NotGpaShaped,
    EmptyAfterCleanup,
    OutOfRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub source: Source,
    pub candidate: Option<String>,
    #[serde(flatten)]
    pub reason: RejectReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldTrace {
    pub field: Field,
    /// Source whose candidate populated the field, if any.
    pub source: Option<Source>,
    pub value: String,
    pub rejected: Vec<Rejection>,
}

/// Which source populated which field, and why the others lost.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionTrace {
    pub fields: Vec<FieldTrace>,
}

impl ResolutionTrace {
    pub fn field(&self, field: Field) -> Option<&FieldTrace> {
        self.fields.iter().find(|t| t.field == field)
    }
}

// ── Resolver ──────────────────────────────────────────────────────────────────

/// Merges entity and regex candidates into the final record. Total and
/// deterministic: the worst case is an all-empty record.
#[derive(Debug, Clone)]
pub struct FieldResolver {
    min_name_len: usize,
    min_major_len: usize,
    denylist: Vec<String>,
    allowlist: Vec<String>,
    corrections: HashMap<String, String>,
}

impl Default for FieldResolver {
    fn default() -> Self {
        Self::new(ResolverConfig::default())
    }
}

impl FieldResolver {
    pub fn new(config: ResolverConfig) -> Self {
        let denylist = normalized_terms(&config.major_denylist);
        let allowlist = normalized_terms(&config.major_allowlist);
        let corrections = config
            .name_corrections
            .into_iter()
            .map(|(k, v)| (k.trim().to_lowercase(), v))
            .collect();
        Self {
            min_name_len: config.min_name_len,
            min_major_len: config.min_major_len,
            denylist,
            allowlist,
            corrections,
        }
    }

    pub fn resolve(&self, entities: &EntityMap, regex: &RegexCandidates) -> FieldRecord {
        self.resolve_traced(entities, regex).0
    }

    pub fn resolve_traced(
        &self,
        entities: &EntityMap,
        regex: &RegexCandidates,
    ) -> (FieldRecord, ResolutionTrace) {
        let mut record = FieldRecord::default();
        let mut trace = ResolutionTrace::default();

        for strategy in &STRATEGIES {
            let field_trace = self.resolve_field(strategy, entities, regex);
            match strategy.field {
                Field::Name => {
                    let (first, last) = split_name(&field_trace.value);
                    record.first_name = first;
                    record.last_name = last;
                }
                Field::Major => record.major = field_trace.value.clone(),
                Field::Gpa => record.gpa = field_trace.value.clone(),
            }
            trace.fields.push(field_trace);
        }

        (record, trace)
    }

    fn resolve_field(
        &self,
        strategy: &FieldStrategy,
        entities: &EntityMap,
        regex: &RegexCandidates,
    ) -> FieldTrace {
        let field = strategy.field;
        let mut rejected = Vec::new();

        for &source in strategy.sources {
            let Some(raw) = candidate(field, source, entities, regex) else {
                rejected.push(Rejection { source, candidate: None, reason: RejectReason::Missing });
                continue;
            };
            let reject = |reason| Rejection {
                source,
                candidate: Some(raw.to_string()),
                reason,
            };

            if let Err(reason) = self.admit(field, source, raw) {
                rejected.push(reject(reason));
                continue;
            }
            match self.finish(field, raw) {
                Ok(value) => {
                    return FieldTrace { field, source: Some(source), value, rejected };
                }
                Err(reason) => {
                    rejected.push(reject(reason));
                    if !strategy.fallthrough_on_invalid {
                        break;
                    }
                }
            }
        }

        FieldTrace { field, source: None, value: String::new(), rejected }
    }

    /// Source-specific gate a candidate must pass before it is chosen.
    fn admit(&self, field: Field, source: Source, raw: &str) -> Result<(), RejectReason> {
        let value = raw.trim();
        match (field, source) {
            (Field::Name, Source::Entity) if value.chars().count() < self.min_name_len => {
                Err(RejectReason::TooShort { min: self.min_name_len })
            }
            (Field::Name, _) if value.is_empty() => Err(RejectReason::TooShort { min: 1 }),
            (Field::Name, _) => Ok(()),
            (Field::Major, _) => self.check_major(value),
            (Field::Gpa, Source::Regex) if value.is_empty() => Err(RejectReason::NotGpaShaped),
            (Field::Gpa, Source::Regex) => Ok(()),
            // Two bare digits are a GPA that lost its decimal point; three are
            // more likely part of a phone number.
            (Field::Gpa, Source::Entity) => {
                let two_digits = value.len() == 2 && value.bytes().all(|b| b.is_ascii_digit());
                if value.contains('.') || two_digits {
                    Ok(())
                } else {
                    Err(RejectReason::NotGpaShaped)
                }
            }
        }
    }

    /// Sanitize a chosen candidate into the field's final value.
    fn finish(&self, field: Field, raw: &str) -> Result<String, RejectReason> {
        match field {
            Field::Name => {
                let cleaned = self.clean_name(raw);
                if cleaned.is_empty() {
                    Err(RejectReason::EmptyAfterCleanup)
                } else {
                    Ok(cleaned)
                }
            }
            Field::Major => Ok(collapse_whitespace(raw)),
            Field::Gpa => validate_gpa(raw).ok_or(RejectReason::OutOfRange),
        }
    }

    fn check_major(&self, value: &str) -> Result<(), RejectReason> {
        if value.chars().count() < self.min_major_len.max(1) {
            return Err(RejectReason::TooShort { min: self.min_major_len.max(1) });
        }
        let mut haystack = collapse_whitespace(value).to_lowercase();
        for allowed in &self.allowlist {
            haystack = haystack.replace(allowed.as_str(), " ");
        }
        let hit = self.denylist.iter().find(|token| haystack.contains(token.as_str()));
        match hit {
            Some(token) => Err(RejectReason::Denylisted { token: token.clone() }),
            None => Ok(()),
        }
    }

    /// Strip leading role labels and repair known misreadings of the first
    /// token.
    pub fn clean_name(&self, raw: &str) -> String {
        let mut rest = raw.trim();
        while let Some(m) = re_role_label().find(rest) {
            if m.end() == 0 {
                break;
            }
            rest = rest[m.end()..].trim_start();
        }

        let mut tokens = rest.split_whitespace();
        let Some(first) = tokens.next() else {
            return String::new();
        };
        let first = self
            .corrections
            .get(&first.to_lowercase())
            .map(String::as_str)
            .unwrap_or(first);
        std::iter::once(first).chain(tokens).collect::<Vec<_>>().join(" ")
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalized_terms(terms: &[String]) -> Vec<String> {
    terms
        .iter()
        .map(|t| collapse_whitespace(t).to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

fn candidate<'a>(
    field: Field,
    source: Source,
    entities: &'a EntityMap,
    regex: &'a RegexCandidates,
) -> Option<&'a str> {
    match source {
        Source::Entity => entities.get(EntityLabel::for_field(field)),
        Source::Regex => regex.get(field),
    }
}

/// First token is the first name; everything after it is the last name.
pub fn split_name(cleaned: &str) -> (String, String) {
    let mut tokens = cleaned.split_whitespace();
    let first = tokens.next().unwrap_or_default().to_string();
    let last = tokens.collect::<Vec<_>>().join(" ");
    (first, last)
}

/// Keep digits and dots, then accept values in 0–5 as-is and values in
/// 10–50 as a GPA missing its decimal point.
pub fn validate_gpa(raw: &str) -> Option<String> {
    let cleaned: String = raw.chars().filter(|c| c.is_ascii_digit() || *c == '.').collect();
    if cleaned.is_empty() {
        return None;
    }
    let value = Decimal::from_str(&cleaned).ok()?;
    let max = Decimal::from(5);

    if value >= Decimal::ZERO && value <= max {
        return Some(cleaned);
    }
    if value >= Decimal::TEN && value <= Decimal::from(50) {
        let scaled = (value / Decimal::TEN).normalize();
        if scaled <= max {
            return Some(if scaled.scale() == 0 {
                format!("{scaled}.0")
            } else {
                scaled.to_string()
            });
        }
    }
    None
}
