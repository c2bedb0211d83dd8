//! Milestone membership from roadmap markdown.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::ids::ItemId;

static PHASE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bphase\s+(\d+(?:\.\d+)*)\b").expect("phase mention regex")
});

/// Phase ids listed under the milestone heading for `version`, sorted and deduplicated.
///
/// The section starts at the first heading containing `version` as a token
/// (`v1.0` also matches a `1.0` argument) and ends at the next heading of the
/// same or higher level. Returns `None` when no heading matches.
pub fn milestone_phases(roadmap: &str, version: &str) -> Option<Vec<ItemId>> {
    let mut section_level: Option<usize> = None;
    let mut phases: Vec<ItemId> = Vec::new();

    for line in roadmap.lines() {
        if let Some((level, text)) = heading(line) {
            match section_level {
                Some(current) if level <= current => break,
                Some(_) => {}
                None => {
                    if contains_version(text, version) {
                        section_level = Some(level);
                    }
                    continue;
                }
            }
        }
        if section_level.is_none() {
            continue;
        }
        for caps in PHASE_RE.captures_iter(line) {
            if let Some(id) = ItemId::parse(&caps[1]) {
                if !phases.contains(&id) {
                    phases.push(id);
                }
            }
        }
    }

    section_level?;
    phases.sort();
    Some(phases)
}

fn heading(line: &str) -> Option<(usize, &str)> {
    let trimmed = line.trim_start();
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    if level == 0 {
        return None;
    }
    let rest = &trimmed[level..];
    if !rest.is_empty() && !rest.starts_with(' ') {
        return None;
    }
    Some((level, rest.trim()))
}

fn contains_version(text: &str, version: &str) -> bool {
    let wanted = version.trim().trim_start_matches(['v', 'V']);
    if wanted.is_empty() {
        return false;
    }
    text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '.'))
        .map(|token| token.trim_end_matches('.'))
        .any(|token| token.trim_start_matches(['v', 'V']) == wanted)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROADMAP: &str = "\
# Roadmap

## Milestone v1.0: MVP

### Phase 1: Foundation
### Phase 2: Auth
- Phase 2.1 (inserted): session fixes
### Phase 10: Polish

## Milestone v1.1

### Phase 11: Billing
";

    fn ids(raw: &[&str]) -> Vec<ItemId> {
        raw.iter().map(|r| ItemId::parse(r).expect("id")).collect()
    }

    #[test]
    fn collects_phases_until_next_sibling_heading() {
        let phases = milestone_phases(ROADMAP, "v1.0").expect("milestone");
        assert_eq!(phases, ids(&["1", "2", "2.1", "10"]));
    }

    #[test]
    fn version_without_prefix_matches() {
        let phases = milestone_phases(ROADMAP, "1.1").expect("milestone");
        assert_eq!(phases, ids(&["11"]));
    }

    #[test]
    fn partial_version_token_does_not_match() {
        assert!(milestone_phases(ROADMAP, "v1").is_none());
    }

    #[test]
    fn unknown_milestone_is_none() {
        assert!(milestone_phases(ROADMAP, "v9.0").is_none());
    }
}
