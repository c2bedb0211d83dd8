//! Declarative classification of conflicting files.
//!
//! Rules are evaluated in order; the first rule whose pattern matches decides
//! the class. Paths that match no rule are `Related`.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::branch_name::topic_tokens;
use crate::core::types::ConflictClass;

/// Class a matching rule assigns.
#[derive(Debug, Clone, Copy)]
pub enum RuleClass {
    Always(ConflictClass),
    /// `Unrelated` unless the branch topic mentions one of these tokens.
    UnrelatedUnlessTopic(&'static [&'static str]),
}

/// One row of the rule table.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub name: &'static str,
    pub pattern: &'static str,
    pub class: RuleClass,
}

/// Default ordered rule table. Test files are classified before platform
/// directories so a test under `ios/` is still unrelated.
pub const DEFAULT_RULES: &[Rule] = &[
    Rule {
        name: "test-dir",
        pattern: r"(^|/)(tests?|__tests__|__snapshots__|spec)/",
        class: RuleClass::Always(ConflictClass::Unrelated),
    },
    Rule {
        name: "test-file",
        pattern: r"([._-](test|spec|tests)(\.[^/]*)?$)|((^|/)test_[^/]*$)",
        class: RuleClass::Always(ConflictClass::Unrelated),
    },
    Rule {
        name: "lockfile",
        pattern: r"(^|/)(Cargo\.lock|package-lock\.json|yarn\.lock|pnpm-lock\.yaml|Gemfile\.lock|poetry\.lock|go\.sum)$",
        class: RuleClass::Always(ConflictClass::Unrelated),
    },
    Rule {
        name: "platform-ios",
        pattern: r"(^|/)ios/",
        class: RuleClass::UnrelatedUnlessTopic(&["ios", "iphone", "ipad", "swift"]),
    },
    Rule {
        name: "platform-android",
        pattern: r"(^|/)android/",
        class: RuleClass::UnrelatedUnlessTopic(&["android", "kotlin"]),
    },
    Rule {
        name: "platform-macos",
        pattern: r"(^|/)macos/",
        class: RuleClass::UnrelatedUnlessTopic(&["macos", "mac", "osx"]),
    },
    Rule {
        name: "platform-windows",
        pattern: r"(^|/)windows/",
        class: RuleClass::UnrelatedUnlessTopic(&["windows", "win32"]),
    },
    Rule {
        name: "platform-linux",
        pattern: r"(^|/)linux/",
        class: RuleClass::UnrelatedUnlessTopic(&["linux"]),
    },
    Rule {
        name: "platform-web",
        pattern: r"(^|/)web/",
        class: RuleClass::UnrelatedUnlessTopic(&["web", "browser"]),
    },
];

static DEFAULT_TABLE: LazyLock<RuleTable> = LazyLock::new(|| RuleTable::new(DEFAULT_RULES));

/// Compiled rule table.
pub struct RuleTable {
    rules: Vec<(Rule, Regex)>,
}

impl RuleTable {
    pub fn new(rules: &[Rule]) -> Self {
        let rules = rules
            .iter()
            .map(|rule| {
                let regex = Regex::new(rule.pattern).expect("conflict rule pattern should compile");
                (*rule, regex)
            })
            .collect();
        Self { rules }
    }

    /// The default table, compiled once.
    pub fn default_table() -> &'static RuleTable {
        &DEFAULT_TABLE
    }

    /// Classify `path` for a branch about `topic`; also returns the deciding rule name.
    pub fn classify(&self, path: &str, topic: &Topic) -> (ConflictClass, Option<&'static str>) {
        let path = path.trim_start_matches("./");
        for (rule, regex) in &self.rules {
            if !regex.is_match(path) {
                continue;
            }
            let class = match rule.class {
                RuleClass::Always(class) => class,
                RuleClass::UnrelatedUnlessTopic(tokens) => {
                    if topic.mentions_any(tokens) {
                        ConflictClass::Related
                    } else {
                        ConflictClass::Unrelated
                    }
                }
            };
            return (class, Some(rule.name));
        }
        (ConflictClass::Related, None)
    }

    /// Split `paths` into unrelated and related sets, preserving order.
    pub fn partition(&self, paths: &[String], topic: &Topic) -> ConflictSet {
        let mut set = ConflictSet::default();
        for path in paths {
            match self.classify(path, topic).0 {
                ConflictClass::Unrelated => set.unrelated.push(path.clone()),
                ConflictClass::Related => set.related.push(path.clone()),
            }
        }
        set
    }
}

/// Identifying tokens of the branch being merged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topic {
    tokens: BTreeSet<String>,
}

impl Topic {
    /// Build from any number of texts (branch name, objective, ...).
    pub fn from_texts<'a>(texts: impl IntoIterator<Item = &'a str>) -> Self {
        let tokens = texts.into_iter().flat_map(topic_tokens).collect();
        Self { tokens }
    }

    pub fn mentions_any(&self, tokens: &[&str]) -> bool {
        tokens.iter().any(|token| self.tokens.contains(*token))
    }
}

/// Conflicting files for one merge attempt, split by class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictSet {
    pub unrelated: Vec<String>,
    pub related: Vec<String>,
}

/// True if `text` still contains git conflict markers.
pub fn has_conflict_markers(text: &str) -> bool {
    text.lines().any(|line| {
        let line = line.trim_end();
        line.starts_with("<<<<<<< ")
            || line.starts_with(">>>>>>> ")
            || line == "<<<<<<<"
            || line == ">>>>>>>"
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(path: &str, topic: &Topic) -> ConflictClass {
        RuleTable::default_table().classify(path, topic).0
    }

    #[test]
    fn test_files_are_always_unrelated() {
        let topic = Topic::from_texts(["plan/04-01-ios-tests"]);
        for path in [
            "a.test",
            "src/auth.test.ts",
            "pkg/auth_test.go",
            "tests/login.rs",
            "ios/AppTests/test_login.swift",
            "web/__tests__/app.js",
        ] {
            assert_eq!(classify(path, &topic), ConflictClass::Unrelated, "{path}");
        }
    }

    #[test]
    fn platform_paths_depend_on_topic() {
        let unrelated_topic = Topic::from_texts(["plan/02-01-billing-api"]);
        let ios_topic = Topic::from_texts(["plan/02-01-ios-push-notifications"]);
        assert_eq!(
            classify("ios/App/Push.swift", &unrelated_topic),
            ConflictClass::Unrelated
        );
        assert_eq!(
            classify("ios/App/Push.swift", &ios_topic),
            ConflictClass::Related
        );
    }

    #[test]
    fn unmatched_paths_are_related() {
        let topic = Topic::default();
        assert_eq!(classify("b.core", &topic), ConflictClass::Related);
        assert_eq!(classify("src/contest.rs", &topic), ConflictClass::Related);
        assert_eq!(
            RuleTable::default_table().classify("src/lib.rs", &topic).1,
            None
        );
    }

    #[test]
    fn lockfiles_are_unrelated() {
        assert_eq!(
            classify("Cargo.lock", &Topic::default()),
            ConflictClass::Unrelated
        );
    }

    #[test]
    fn partition_preserves_order() {
        let paths = vec![
            "b.core".to_string(),
            "a.test".to_string(),
            "c.core".to_string(),
        ];
        let set = RuleTable::default_table().partition(&paths, &Topic::default());
        assert_eq!(set.unrelated, vec!["a.test"]);
        assert_eq!(set.related, vec!["b.core", "c.core"]);
    }

    #[test]
    fn detects_conflict_markers() {
        assert!(has_conflict_markers(
            "a\n<<<<<<< HEAD\nb\n=======\nc\n>>>>>>> main\n"
        ));
        assert!(!has_conflict_markers("title\n=======\nbody\n"));
    }
}
