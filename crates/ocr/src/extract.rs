use std::sync::OnceLock;

use autoform_core::RegexCandidates;
use regex::Regex;

// ── Compiled regex cache ─────────────────────────────────────────────────────

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

re!(re_name_line,
    r"(?i)^\s*(?:name|student|candidate)\b\s*[:.\-]?\s*([^:.\-\s].*?)\s*$");
re!(re_first_name_line,
    r"(?i)^\s*(?:first\s*name|first|given\s+name)\b\s*[:.\-]?\s*([^:.\-\s].*?)\s*$");
re!(re_last_name_line,
    r"(?i)^\s*(?:last\s*name|last|surname|family\s+name)\b\s*[:.\-]?\s*([^:.\-\s].*?)\s*$");
re!(re_major_line,
    r"(?i)^\s*(?:major|program|degree|field\s+of\s+study)\b\s*[:.\-]?\s*([^:.\-\s].*?)\s*$");
re!(re_gpa_labeled,
    r"(?is)\b(?:gpa|grade|average)\b.*?(\d+\.\d+)");
re!(re_gpa_bare,
    r"\b([0-4]\.\d{1,2})\b");

// ── Public extraction API ─────────────────────────────────────────────────────

pub fn extract_fallback(text: &str) -> RegexCandidates {
    FallbackExtractor::extract(text)
}

/// Label-driven pattern search over raw OCR text. Independent of the entity
/// source; keeps only the first match per field.
pub struct FallbackExtractor;

impl FallbackExtractor {
    pub fn extract(text: &str) -> RegexCandidates {
        RegexCandidates {
            name: Self::extract_name(text),
            major: first_line_value(text, re_major_line()),
            gpa: Self::extract_gpa(text),
        }
    }

    /// A full-name line wins; otherwise separate first/last lines are joined
    /// so the resolver can split them again.
    fn extract_name(text: &str) -> Option<String> {
        if let Some(full) = first_line_value(text, re_name_line()) {
            return Some(full);
        }
        let first = first_line_value(text, re_first_name_line())?;
        match first_line_value(text, re_last_name_line()) {
            Some(last) => Some(format!("{first} {last}")),
            None => Some(first),
        }
    }

    fn extract_gpa(text: &str) -> Option<String> {
        if let Some(c) = re_gpa_labeled().captures(text) {
            return c.get(1).map(|m| m.as_str().to_string());
        }
        // Last resort: any plausible GPA-shaped number, no context.
        re_gpa_bare()
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }
}

fn first_line_value(text: &str, re: &Regex) -> Option<String> {
    text.lines()
        .filter_map(|line| re.captures(line)?.get(1))
        .map(|m| m.as_str().trim())
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labeled_form_yields_all_three() {
        let text = "Student: Sarah Connor\nProgram: Mechanical Engineering\nGrade Point Average: 4.0";
        let c = FallbackExtractor::extract(text);
        assert_eq!(c.name.as_deref(), Some("Sarah Connor"));
        assert_eq!(c.major.as_deref(), Some("Mechanical Engineering"));
        assert_eq!(c.gpa.as_deref(), Some("4.0"));
    }

    #[test]
    fn labels_are_case_insensitive_with_any_separator() {
        let c = FallbackExtractor::extract("CANDIDATE - Alice Wonderland\ndegree. Arts & Design\ngpa 3.92");
        assert_eq!(c.name.as_deref(), Some("Alice Wonderland"));
        assert_eq!(c.major.as_deref(), Some("Arts & Design"));
        assert_eq!(c.gpa.as_deref(), Some("3.92"));
    }

    #[test]
    fn label_must_start_the_line() {
        let c = FallbackExtractor::extract("University of Technology. Student Name: Robert Downey Jr.");
        assert_eq!(c.name, None);
    }

    #[test]
    fn split_name_lines_are_joined() {
        let c = FallbackExtractor::extract("First Name: John\nLast Name: Smith\nGPA: 3.4");
        assert_eq!(c.name.as_deref(), Some("John Smith"));
    }

    #[test]
    fn split_name_label_variants() {
        let c = FallbackExtractor::extract("Surname - Prince\nfirstname: Diana");
        assert_eq!(c.name.as_deref(), Some("Diana Prince"));
        let c = FallbackExtractor::extract("Given Name. Bruce\nFamily Name: Wayne");
        assert_eq!(c.name.as_deref(), Some("Bruce Wayne"));
    }

    #[test]
    fn first_name_line_alone_is_the_name() {
        let c = FallbackExtractor::extract("First: Madonna");
        assert_eq!(c.name.as_deref(), Some("Madonna"));
    }

    #[test]
    fn last_name_line_alone_yields_no_name() {
        let c = FallbackExtractor::extract("Last Name: Smith");
        assert_eq!(c.name, None);
    }

    #[test]
    fn full_name_line_wins_over_split_lines() {
        let c = FallbackExtractor::extract("First Name: Jane\nLast Name: Roe\nName: Tom Hanks");
        assert_eq!(c.name.as_deref(), Some("Tom Hanks"));
    }

    #[test]
    fn field_of_study_is_a_major_label() {
        let c = FallbackExtractor::extract("Field of Study: Biology");
        assert_eq!(c.major.as_deref(), Some("Biology"));
    }

    #[test]
    fn only_first_match_is_kept() {
        let c = FallbackExtractor::extract("Name: Tom Hanks\nName: Clark Kent\nMajor: Drama\nMajor: Journalism");
        assert_eq!(c.name.as_deref(), Some("Tom Hanks"));
        assert_eq!(c.major.as_deref(), Some("Drama"));
    }

    #[test]
    fn empty_remainder_moves_on_to_next_line() {
        let c = FallbackExtractor::extract("Name:\nStudent: Diana Prince");
        assert_eq!(c.name.as_deref(), Some("Diana Prince"));
    }

    #[test]
    fn gpa_label_may_precede_number_on_a_later_line() {
        let c = FallbackExtractor::extract("Cumulative GPA\n\n  3.1 / 4.0");
        assert_eq!(c.gpa.as_deref(), Some("3.1"));
    }

    #[test]
    fn gpa_without_label_uses_strict_bare_pattern() {
        let c = FallbackExtractor::extract("Diana Prince. Anthropology. 3.75");
        assert_eq!(c.gpa.as_deref(), Some("3.75"));
    }

    #[test]
    fn bare_pattern_rejects_out_of_range_leading_digit() {
        let c = FallbackExtractor::extract("Room 7.5\nPhone 555.1234");
        assert_eq!(c.gpa, None);
    }

    #[test]
    fn labeled_gpa_is_returned_unvalidated() {
        // Range checks belong to the resolver.
        let c = FallbackExtractor::extract("GPA: 7.9");
        assert_eq!(c.gpa.as_deref(), Some("7.9"));
    }

    #[test]
    fn labeled_gpa_without_decimal_point_is_not_matched() {
        let c = FallbackExtractor::extract("GPA: 35");
        assert_eq!(c.gpa, None);
    }

    #[test]
    fn empty_text_yields_nothing() {
        assert_eq!(FallbackExtractor::extract(""), RegexCandidates::default());
    }

    #[test]
    fn no_panic_on_garbage_input() {
        let _ = FallbackExtractor::extract("!@#$%^&*()\n\0\x01\x02 Name");
    }
}
