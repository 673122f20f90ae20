use std::path::{Path, PathBuf};
use std::sync::Arc;

use autoform_core::{EntityLabel, EntityMap, NerConfig};
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum NerError {
    #[error("Failed to load entity model {path}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },
    #[error("Invalid pattern for label {label}: {source}")]
    Pattern {
        label: String,
        #[source]
        source: regex::Error,
    },
    #[error("Entity inference failed: {0}")]
    Inference(String),
}

/// One tagged span. Offsets are byte positions into the tagged text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySpan {
    pub label: String,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

impl EntitySpan {
    fn overlaps(&self, other: &EntitySpan) -> bool {
        self.start < other.end && other.start < self.end
    }

    fn same_text(&self, other: &EntitySpan) -> bool {
        let a = self.text.trim().to_lowercase();
        let b = other.text.trim().to_lowercase();
        !a.is_empty() && !b.is_empty() && (a.contains(&b) || b.contains(&a))
    }
}

/// Abstraction over a named-entity backend.
pub trait EntityTagger: Send + Sync {
    fn tag(&self, text: &str) -> Result<Vec<EntitySpan>, NerError>;
}

const PERSON_LABEL: &str = "PERSON";

// ── Rule-based backend ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default, rename = "rule")]
    rules: Vec<RuleSpec>,
}

#[derive(Debug, Deserialize)]
struct RuleSpec {
    label: String,
    pattern: String,
}

/// Tagger driven by labelled regex rules loaded from a TOML model file:
///
/// ```toml
/// [[rule]]
/// label = "MAJOR"
/// pattern = '(?i)major\s*:\s*(\w+)'
/// ```
///
/// The first capture group (or the whole match) becomes the span.
pub struct RuleTagger {
    rules: Vec<(String, Regex)>,
}

impl RuleTagger {
    pub fn from_toml(content: &str) -> Result<Self, NerError> {
        let file: RuleFile = toml::from_str(content).map_err(|e| NerError::ModelLoad {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })?;
        let rules = file
            .rules
            .into_iter()
            .map(|r| {
                let re = Regex::new(&r.pattern).map_err(|source| NerError::Pattern {
                    label: r.label.clone(),
                    source,
                })?;
                Ok((r.label, re))
            })
            .collect::<Result<Vec<_>, NerError>>()?;
        Ok(Self { rules })
    }

    pub fn load(path: &Path) -> Result<Self, NerError> {
        let content = std::fs::read_to_string(path).map_err(|e| NerError::ModelLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            NerError::ModelLoad { reason, .. } => NerError::ModelLoad {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl EntityTagger for RuleTagger {
    fn tag(&self, text: &str) -> Result<Vec<EntitySpan>, NerError> {
        let mut spans: Vec<EntitySpan> = self
            .rules
            .iter()
            .flat_map(|(label, re)| {
                re.captures_iter(text).filter_map(move |c| {
                    let m = c.get(1).or_else(|| c.get(0))?;
                    Some(EntitySpan {
                        label: label.clone(),
                        text: m.as_str().to_string(),
                        start: m.start(),
                        end: m.end(),
                    })
                })
            })
            .collect();
        spans.sort_by_key(|s| (s.start, s.end));
        Ok(spans)
    }
}

// ── Mock backend (always available, used for tests) ───────────────────────────

/// Returns pre-set `(label, text)` spans, located in the input where possible.
pub struct MockTagger {
    pub spans: Vec<(String, String)>,
}

impl MockTagger {
    pub fn new<L: Into<String>, T: Into<String>>(spans: impl IntoIterator<Item = (L, T)>) -> Self {
        Self {
            spans: spans.into_iter().map(|(l, t)| (l.into(), t.into())).collect(),
        }
    }
}

impl EntityTagger for MockTagger {
    fn tag(&self, text: &str) -> Result<Vec<EntitySpan>, NerError> {
        Ok(self
            .spans
            .iter()
            .map(|(label, value)| {
                let (start, end) = text
                    .find(value.as_str())
                    .map(|s| (s, s + value.len()))
                    .unwrap_or((0, 0));
                EntitySpan {
                    label: label.clone(),
                    text: value.clone(),
                    start,
                    end,
                }
            })
            .collect())
    }
}

// ── Entity source ─────────────────────────────────────────────────────────────

/// Loaded model handles. Built once at startup, shared read-only.
#[derive(Clone, Default)]
pub struct EntityModels {
    primary: Option<Arc<dyn EntityTagger>>,
    validator: Option<Arc<dyn EntityTagger>>,
}

impl EntityModels {
    pub fn new(
        primary: Option<Arc<dyn EntityTagger>>,
        validator: Option<Arc<dyn EntityTagger>>,
    ) -> Self {
        Self { primary, validator }
    }

    /// No models at all; every extraction gets an empty map.
    pub fn none() -> Self {
        Self::default()
    }

    /// Load rule models from the configured paths. A model that fails to
    /// load is left absent rather than reported.
    pub fn load(config: &NerConfig) -> Self {
        let primary = load_optional(config.model_path.as_deref(), "entity model");
        let validator = load_optional(config.validator_path.as_deref(), "person validator");
        if primary.is_some() && validator.is_none() {
            warn!("No person validator loaded; name candidates will not be cross-checked");
        }
        Self { primary, validator }
    }

    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }

    pub fn has_validator(&self) -> bool {
        self.validator.is_some()
    }

    /// Tag `text` and keep the first candidate per label. A person-name
    /// candidate the validator does not also see as a person is dropped.
    pub fn tag_entities(&self, text: &str) -> EntityMap {
        let Some(primary) = &self.primary else {
            return EntityMap::new();
        };
        let mut spans = match primary.tag(text) {
            Ok(spans) => spans,
            Err(e) => {
                warn!("Entity tagging failed: {e}");
                return EntityMap::new();
            }
        };
        spans.sort_by_key(|s| s.start);

        let mut map = EntityMap::new();
        let mut person_span = None;
        for span in spans {
            let Some(label) = EntityLabel::from_model_label(&span.label) else {
                continue;
            };
            let value = span.text.trim();
            if value.is_empty() {
                continue;
            }
            if map.insert_first(label, value) && label == EntityLabel::PersonName {
                person_span = Some(span);
            }
        }

        if let (Some(span), Some(validator)) = (person_span, &self.validator) {
            if !confirmed_as_person(validator.as_ref(), text, &span) {
                debug!(candidate = %span.text, "Validator rejected person candidate");
                map.remove(EntityLabel::PersonName);
            }
        }

        debug!(entities = map.len(), "Entity tagging complete");
        map
    }
}

fn load_optional(path: Option<&Path>, what: &str) -> Option<Arc<dyn EntityTagger>> {
    let path = path?;
    match RuleTagger::load(path) {
        Ok(tagger) => {
            info!("Loaded {what} from {} ({} rules)", path.display(), tagger.len());
            Some(Arc::new(tagger))
        }
        Err(e) => {
            warn!("Could not load {what}: {e}");
            None
        }
    }
}

fn confirmed_as_person(validator: &dyn EntityTagger, text: &str, candidate: &EntitySpan) -> bool {
    match validator.tag(text) {
        Ok(spans) => spans
            .iter()
            .filter(|s| s.label.eq_ignore_ascii_case(PERSON_LABEL))
            .any(|s| s.overlaps(candidate) || s.same_text(candidate)),
        Err(e) => {
            warn!("Person validation failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORM_MODEL: &str = include_str!("../../../models/form_entities.toml");
    const PERSON_MODEL: &str = include_str!("../../../models/person.toml");

    struct FailingTagger;

    impl EntityTagger for FailingTagger {
        fn tag(&self, _text: &str) -> Result<Vec<EntitySpan>, NerError> {
            Err(NerError::Inference("model crashed".into()))
        }
    }

    fn models(primary: impl EntityTagger + 'static, validator: Option<Arc<dyn EntityTagger>>) -> EntityModels {
        EntityModels::new(Some(Arc::new(primary)), validator)
    }

    #[test]
    fn no_model_yields_empty_map() {
        assert!(EntityModels::none().tag_entities("Name: John Smith").is_empty());
    }

    #[test]
    fn tagger_error_yields_empty_map() {
        let m = models(FailingTagger, None);
        assert!(m.tag_entities("Name: John Smith").is_empty());
    }

    #[test]
    fn first_span_per_label_wins_and_unknown_labels_are_ignored() {
        let text = "GPA 3.1 then GPA 3.9, ORG Acme";
        let m = models(
            MockTagger::new([("GPA", "3.9"), ("ORG", "Acme"), ("GPA", "3.1")]),
            None,
        );
        let map = m.tag_entities(text);
        assert_eq!(map.get(EntityLabel::Gpa), Some("3.1"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn validator_confirms_overlapping_person() {
        let text = "Name: Clark Kent";
        let m = models(
            MockTagger::new([("STUDENT_NAME", "Clark Kent")]),
            Some(Arc::new(MockTagger::new([("PERSON", "Clark Kent")]))),
        );
        assert_eq!(m.tag_entities(text).get(EntityLabel::PersonName), Some("Clark Kent"));
    }

    #[test]
    fn validator_rejection_drops_only_the_name() {
        let text = "Name: Computer Lab  Major: Physics";
        let m = models(
            MockTagger::new([("STUDENT_NAME", "Computer Lab"), ("MAJOR", "Physics")]),
            Some(Arc::new(MockTagger::new([("ORG", "Computer Lab")]))),
        );
        let map = m.tag_entities(text);
        assert_eq!(map.get(EntityLabel::PersonName), None);
        assert_eq!(map.get(EntityLabel::Major), Some("Physics"));
    }

    #[test]
    fn failing_validator_drops_the_name() {
        let m = models(
            MockTagger::new([("STUDENT_NAME", "Clark Kent")]),
            Some(Arc::new(FailingTagger)),
        );
        assert!(m.tag_entities("Clark Kent").is_empty());
    }

    #[test]
    fn missing_validator_keeps_name_unchecked() {
        let m = models(MockTagger::new([("STUDENT_NAME", "Clark Kent")]), None);
        assert_eq!(m.tag_entities("Clark Kent").get(EntityLabel::PersonName), Some("Clark Kent"));
    }

    #[test]
    fn rule_tagger_reports_capture_group_offsets() {
        let t = RuleTagger::from_toml(
            r#"
            [[rule]]
            label = "MAJOR"
            pattern = '(?i)major:\s*(\w+)'
            "#,
        )
        .unwrap();
        let spans = t.tag("Major: Drama").unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, "Drama");
        assert_eq!((spans[0].start, spans[0].end), (7, 12));
    }

    #[test]
    fn rule_tagger_rejects_bad_pattern() {
        let err = RuleTagger::from_toml("[[rule]]\nlabel = \"GPA\"\npattern = '(unclosed'").err().unwrap();
        assert!(matches!(err, NerError::Pattern { .. }));
    }

    #[test]
    fn load_missing_model_is_absent_not_fatal() {
        let m = EntityModels::load(&NerConfig {
            model_path: Some(PathBuf::from("/nonexistent/model.toml")),
            validator_path: None,
        });
        assert!(!m.has_primary());
        assert!(m.tag_entities("Name: John Smith").is_empty());
    }

    #[test]
    fn load_reads_model_files_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("form.toml");
        let person = dir.path().join("person.toml");
        std::fs::write(&model, FORM_MODEL).unwrap();
        std::fs::write(&person, PERSON_MODEL).unwrap();
        let m = EntityModels::load(&NerConfig {
            model_path: Some(model),
            validator_path: Some(person),
        });
        assert!(m.has_primary());
        assert!(m.has_validator());
    }

    #[test]
    fn shipped_models_tag_a_labelled_form() {
        let m = EntityModels::new(
            Some(Arc::new(RuleTagger::from_toml(FORM_MODEL).unwrap())),
            Some(Arc::new(RuleTagger::from_toml(PERSON_MODEL).unwrap())),
        );
        let map = m.tag_entities("Name: John Smith Major: Computer Science GPA: 3.8");
        assert_eq!(map.get(EntityLabel::PersonName), Some("John Smith"));
        assert_eq!(map.get(EntityLabel::Major), Some("Computer Science"));
        assert_eq!(map.get(EntityLabel::Gpa), Some("3.8"));
    }

    #[test]
    fn shipped_validator_rejects_lowercase_name() {
        let m = EntityModels::new(
            Some(Arc::new(RuleTagger::from_toml(FORM_MODEL).unwrap())),
            Some(Arc::new(RuleTagger::from_toml(PERSON_MODEL).unwrap())),
        );
        let map = m.tag_entities("name is jenny lopez, she studies biology");
        assert_eq!(map.get(EntityLabel::PersonName), None);
    }
}
