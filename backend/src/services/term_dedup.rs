use std::collections::HashSet;

/// Folds case and whitespace so that "Golf  Tips" and "golf tips" are the same
/// unit of work.
pub fn normalize_term(raw: &str) -> String {
    raw.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct TermDeduplicator;

impl TermDeduplicator {
    /// Normalizes `candidates` and drops blanks, repeats and anything already
    /// in `already_seen`, keeping first-occurrence order.
    pub fn filter<I, S>(candidates: I, already_seen: &HashSet<String>) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut emitted = HashSet::new();
        candidates
            .into_iter()
            .map(|term| normalize_term(term.as_ref()))
            .filter(|term| !term.is_empty())
            .filter(|term| !already_seen.contains(term))
            .filter(|term| emitted.insert(term.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_whitespace() {
        assert_eq!(normalize_term("  Golf \t TIPS\n"), "golf tips");
        assert_eq!(normalize_term("   "), "");
    }

    #[test]
    fn keeps_first_occurrence_order() {
        let terms = ["Golf Tips", "golf tips", "Putting Drills", " GOLF   tips "];
        let filtered = TermDeduplicator::filter(terms, &HashSet::new());
        assert_eq!(filtered, vec!["golf tips", "putting drills"]);
    }

    #[test]
    fn skips_terms_already_seen() {
        let seen = HashSet::from([normalize_term("Masters  Tournament")]);

        let filtered = TermDeduplicator::filter(["masters tournament", "ryder cup"], &seen);
        assert_eq!(filtered, vec!["ryder cup"]);
    }

    #[test]
    fn drops_blank_terms() {
        let filtered = TermDeduplicator::filter(["", "   ", "links golf"], &HashSet::new());
        assert_eq!(filtered, vec!["links golf"]);
    }
}
