//! Typed record parsed from a plan definition document.
//!
//! Plan documents are human-authored markdown with a handful of tag-delimited
//! sections. They are parsed exactly once into [`PlanRecord`]; everything
//! downstream consumes these typed fields.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static OBJECTIVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<objective>(.*?)</objective>").expect("objective regex"));
static TASK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<task\b[^>]*>(.*?)</task>").expect("task regex"));
static VERIFICATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<verification>(.*?)</verification>").expect("verification regex")
});

/// One dispatchable task declared by a plan.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct TaskRecord {
    pub name: String,
    pub files: Vec<String>,
    pub action: String,
    /// Command or instructions used to verify the task.
    pub verify: String,
    pub done: String,
}

/// Structured view of a plan definition.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct PlanRecord {
    pub objective: String,
    pub tasks: Vec<TaskRecord>,
    /// Files declared as modified (frontmatter plus every task's file list).
    pub files: Vec<String>,
    pub verification: Vec<String>,
}

impl PlanRecord {
    /// First non-empty line of the objective, or an empty string.
    pub fn objective_line(&self) -> &str {
        self.objective
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("")
    }
}

/// Parse plan markdown into a [`PlanRecord`]. Missing sections yield empty fields.
pub fn parse_plan(text: &str) -> PlanRecord {
    let objective = OBJECTIVE_RE
        .captures(text)
        .map(|caps| caps[1].trim().to_string())
        .unwrap_or_default();

    let tasks: Vec<TaskRecord> = TASK_RE
        .captures_iter(text)
        .map(|caps| parse_task(&caps[1]))
        .collect();

    let mut files = frontmatter_files(text);
    for task in &tasks {
        for file in &task.files {
            if !files.contains(file) {
                files.push(file.clone());
            }
        }
    }

    let verification = VERIFICATION_RE
        .captures(text)
        .map(|caps| checklist_lines(&caps[1]))
        .unwrap_or_default();

    PlanRecord {
        objective,
        tasks,
        files,
        verification,
    }
}

fn parse_task(body: &str) -> TaskRecord {
    TaskRecord {
        name: tag_text(body, "name"),
        files: split_file_list(&tag_text(body, "files")),
        action: tag_text(body, "action"),
        verify: tag_text(body, "verify"),
        done: tag_text(body, "done"),
    }
}

fn tag_text(body: &str, tag: &str) -> String {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let Some(start) = body.find(&open) else {
        return String::new();
    };
    let rest = &body[start + open.len()..];
    let end = rest.find(&close).unwrap_or(rest.len());
    rest[..end].trim().to_string()
}

fn split_file_list(raw: &str) -> Vec<String> {
    raw.split([',', '\n'])
        .map(|item| item.trim().trim_start_matches("- ").trim_matches('`').trim())
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn checklist_lines(raw: &str) -> Vec<String> {
    raw.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(['-', '*'])
                .trim_start()
                .trim_start_matches("[ ]")
                .trim_start_matches("[x]")
                .trim()
        })
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read `files_modified` from `---` frontmatter (inline list or `- item` lines).
fn frontmatter_files(text: &str) -> Vec<String> {
    let Some(rest) = text.strip_prefix("---") else {
        return Vec::new();
    };
    let Some(end) = rest.find("\n---") else {
        return Vec::new();
    };
    let frontmatter = &rest[..end];

    let mut files = Vec::new();
    let mut in_list = false;
    for line in frontmatter.lines() {
        let trimmed = line.trim();
        if let Some(value) = trimmed.strip_prefix("files_modified:") {
            let value = value.trim();
            if let Some(inline) = value.strip_prefix('[') {
                let inline = inline.trim_end_matches(']');
                files.extend(
                    inline
                        .split(',')
                        .map(|item| item.trim().trim_matches(['"', '\'']).to_string())
                        .filter(|item| !item.is_empty()),
                );
                in_list = false;
            } else {
                in_list = value.is_empty();
            }
            continue;
        }
        if in_list {
            if let Some(item) = trimmed.strip_prefix("- ") {
                files.push(item.trim().trim_matches(['"', '\'']).to_string());
                continue;
            }
            in_list = false;
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = "---\nphase: 03\nfiles_modified: [src/auth.rs, \"src/db.rs\"]\n---\n\n\
<objective>\nAdd login endpoint with session cookies\n\nPurpose: users can sign in.\n</objective>\n\n\
<tasks>\n<task type=\"auto\">\n  <name>Task 1: Session store</name>\n  <files>src/db.rs, src/session.rs</files>\n  \
<action>Create the store.</action>\n  <verify>cargo test session</verify>\n  <done>Store persists sessions</done>\n</task>\n\
<task type=\"auto\">\n  <name>Task 2: Endpoint</name>\n  <files>src/auth.rs</files>\n  <action>Wire it.</action>\n  \
<verify>npx playwright test login</verify>\n  <done>Login works</done>\n</task>\n</tasks>\n\n\
<verification>\n- [ ] cargo test passes\n- [ ] login flow works\n</verification>\n";

    #[test]
    fn parses_objective_tasks_and_files() {
        let record = parse_plan(PLAN);
        assert_eq!(
            record.objective_line(),
            "Add login endpoint with session cookies"
        );
        assert_eq!(record.tasks.len(), 2);
        assert_eq!(record.tasks[0].name, "Task 1: Session store");
        assert_eq!(record.tasks[1].verify, "npx playwright test login");
        assert_eq!(
            record.files,
            vec!["src/auth.rs", "src/db.rs", "src/session.rs"]
        );
        assert_eq!(
            record.verification,
            vec!["cargo test passes", "login flow works"]
        );
    }

    #[test]
    fn frontmatter_block_list_is_supported() {
        let text = "---\nfiles_modified:\n  - a.rs\n  - b.rs\nwave: 1\n---\nbody";
        let record = parse_plan(text);
        assert_eq!(record.files, vec!["a.rs", "b.rs"]);
    }

    #[test]
    fn empty_document_yields_empty_record() {
        let record = parse_plan("");
        assert_eq!(record, PlanRecord::default());
        assert_eq!(record.objective_line(), "");
    }
}
