//! Prompt rendering for agent sessions and PR bodies.
//!
//! Templates are embedded at build time and rendered with minijinja. Every
//! agent prompt tells the session which sentinel to print when it finishes.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::core::plan_record::{PlanRecord, TaskRecord};
use crate::core::sentinel::Sentinels;

const TASK_TEMPLATE: &str = include_str!("prompts/task.md");
const PLAN_TEMPLATE: &str = include_str!("prompts/plan.md");
const SUMMARY_TEMPLATE: &str = include_str!("prompts/summary.md");
const CONFLICT_TEMPLATE: &str = include_str!("prompts/conflict.md");
const PR_BODY_TEMPLATE: &str = include_str!("prompts/pr_body.md");

/// Identity of the plan a prompt is about.
#[derive(Debug, Clone, Copy)]
pub struct UnitRef<'a> {
    pub phase: &'a str,
    pub plan: &'a str,
    pub plan_path: &'a str,
}

impl UnitRef<'_> {
    fn label(&self) -> String {
        format!("{}-{}", self.phase, self.plan)
    }
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
    sentinels: Sentinels,
}

impl PromptEngine {
    pub fn new(sentinels: Sentinels) -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("task", TASK_TEMPLATE)
            .context("load task template")?;
        env.add_template("plan", PLAN_TEMPLATE)
            .context("load plan template")?;
        env.add_template("summary", SUMMARY_TEMPLATE)
            .context("load summary template")?;
        env.add_template("conflict", CONFLICT_TEMPLATE)
            .context("load conflict template")?;
        env.add_template("pr_body", PR_BODY_TEMPLATE)
            .context("load pr body template")?;
        Ok(Self { env, sentinels })
    }

    /// Prompt for one task of a plan (`index` is 1-based).
    pub fn render_task(
        &self,
        unit: UnitRef<'_>,
        plan: &PlanRecord,
        index: usize,
        task: &TaskRecord,
        infra_namespace: Option<&str>,
    ) -> Result<String> {
        let template = self.env.get_template("task")?;
        let rendered = template
            .render(context! {
                unit => unit.label(),
                objective => plan.objective.trim(),
                index => index,
                count => plan.tasks.len(),
                task => task,
                infra_namespace => infra_namespace,
                sentinels => &self.sentinels,
            })
            .context("render task prompt")?;
        Ok(rendered)
    }

    /// Prompt for a plan that declares no tasks.
    pub fn render_plan(
        &self,
        unit: UnitRef<'_>,
        plan: &PlanRecord,
        infra_namespace: Option<&str>,
    ) -> Result<String> {
        let template = self.env.get_template("plan")?;
        let rendered = template
            .render(context! {
                unit => unit.label(),
                plan_path => unit.plan_path,
                objective => plan.objective.trim(),
                files => &plan.files,
                verification => &plan.verification,
                infra_namespace => infra_namespace,
                sentinels => &self.sentinels,
            })
            .context("render plan prompt")?;
        Ok(rendered)
    }

    /// Prompt for the dedicated session that writes the completion artifact.
    pub fn render_summary(
        &self,
        unit: UnitRef<'_>,
        plan: &PlanRecord,
        summary_path: &str,
        base_sha: &str,
    ) -> Result<String> {
        let template = self.env.get_template("summary")?;
        let rendered = template
            .render(context! {
                unit => unit.label(),
                phase => unit.phase,
                plan => unit.plan,
                objective => plan.objective.trim(),
                tasks => &plan.tasks,
                summary_path => summary_path,
                base_sha => base_sha,
                sentinels => &self.sentinels,
            })
            .context("render summary prompt")?;
        Ok(rendered)
    }

    /// Prompt for an agent-assisted merge repair of related files.
    pub fn render_conflict(
        &self,
        branch: &str,
        trunk: &str,
        topic: &str,
        files: &[String],
    ) -> Result<String> {
        let template = self.env.get_template("conflict")?;
        let rendered = template
            .render(context! {
                branch => branch,
                trunk => trunk,
                topic => topic.trim(),
                files => files,
                sentinels => &self.sentinels,
            })
            .context("render conflict prompt")?;
        Ok(rendered)
    }

    /// PR description for one or more plans (`single` strategy groups a whole run).
    pub fn render_pr_body(&self, units: &[String], plans: &[&PlanRecord]) -> Result<String> {
        let objective = plans
            .iter()
            .map(|plan| plan.objective.trim())
            .filter(|objective| !objective.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        let tasks: Vec<&TaskRecord> = plans.iter().flat_map(|plan| plan.tasks.iter()).collect();
        let mut files: Vec<&str> = Vec::new();
        let mut verification: Vec<&str> = Vec::new();
        for plan in plans {
            for file in &plan.files {
                if !files.contains(&file.as_str()) {
                    files.push(file);
                }
            }
            verification.extend(plan.verification.iter().map(String::as_str));
        }
        let template = self.env.get_template("pr_body")?;
        let rendered = template
            .render(context! {
                objective => objective,
                tasks => tasks,
                files => files,
                verification => verification,
                units => units,
            })
            .context("render PR body")?;
        Ok(rendered)
    }
}
