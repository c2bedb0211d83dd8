//! Deterministic branch naming.
//!
//! Branch names are a pure function of the unit's identity and objective so a
//! re-run against a partially completed plan reconstructs the same branch.

/// Lower-case `text`, collapse every run of non-alphanumerics to `-`, strip
/// leading/trailing hyphens, and truncate to `max_len` characters.
pub fn slugify(text: &str, max_len: usize) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_hyphen = false;
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }
    let truncated: String = slug.chars().take(max_len).collect();
    truncated.trim_matches('-').to_string()
}

/// Name of a per-plan branch: `<prefix>/<phase>-<plan>[-<slug>]`.
///
/// Total for any objective text; an empty slug yields the identifier-only form.
pub fn plan_branch_name(
    prefix: &str,
    phase: &str,
    plan: &str,
    objective: &str,
    slug_max_len: usize,
) -> String {
    let slug = slugify(objective, slug_max_len);
    let ids = format!("{phase}-{plan}");
    let leaf = if slug.is_empty() {
        ids
    } else {
        format!("{ids}-{slug}")
    };
    with_prefix(prefix, &leaf)
}

/// Name of the run-wide branch used by the single-branch strategy.
pub fn run_branch_name(prefix: &str, label: &str) -> String {
    let slug = slugify(label, 64);
    let leaf = if slug.is_empty() {
        "run".to_string()
    } else {
        slug
    };
    with_prefix(prefix, &leaf)
}

/// Lower-cased alphanumeric tokens of a branch name or objective.
pub fn topic_tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}

fn with_prefix(prefix: &str, leaf: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        leaf.to_string()
    } else {
        format!("{prefix}/{leaf}")
    }
}
