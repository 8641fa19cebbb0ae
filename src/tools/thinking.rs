//! Sequential thinking with tool recommendations
//!
//! `sequentialthinking_tools` records a chain of numbered thoughts, with
//! revisions and branches, plus optional recommendations of which tools to
//! use for each step. State lives for one MCP session.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::ToolResponse;

/// Tool name as listed to clients.
pub const TOOL_NAME: &str = "sequentialthinking_tools";

/// Tool description as listed to clients.
pub const TOOL_DESCRIPTION: &str = "A tool for dynamic, reflective problem-solving through \
sequential thoughts, recommending which tools to use at each step. Thoughts can revise earlier \
thoughts, branch into alternatives, and extend past the initial estimate. Each call records one \
thought; set next_thought_needed to false only when the answer is complete and verified.";

/// A tool suggested for a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRecommendation {
    /// Name of the recommended tool
    pub tool_name: String,
    /// Confidence between 0 and 1
    pub confidence: f64,
    /// Why this tool fits
    pub rationale: String,
    /// Order in the recommendation sequence
    pub priority: f64,
    /// Suggested parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_inputs: Option<Map<String, Value>>,
    /// Other tools that could be used instead
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternatives: Option<Vec<String>>,
}

/// A recommended step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecommendation {
    /// What needs to be done
    pub step_description: String,
    /// Tools recommended for this step
    pub recommended_tools: Vec<ToolRecommendation>,
    /// What to expect from this step
    pub expected_outcome: String,
    /// Conditions to consider for the next step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step_conditions: Option<Vec<String>>,
}

/// One thought, as submitted by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThoughtData {
    /// The thinking step itself
    pub thought: String,
    /// Position of this thought (1-based)
    pub thought_number: u32,
    /// Current estimate of thoughts needed
    pub total_thoughts: u32,
    /// Whether another thought should follow
    pub next_thought_needed: bool,
    /// Whether this revises an earlier thought
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_revision: Option<bool>,
    /// Thought being revised
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revises_thought: Option<u32>,
    /// Thought this branches from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_from_thought: Option<u32>,
    /// Branch identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    /// Set when the estimate turned out too low
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_more_thoughts: Option<bool>,
    /// Recommendation for the current step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<StepRecommendation>,
    /// Steps already recommended
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_steps: Option<Vec<StepRecommendation>>,
    /// Upcoming steps, in brief
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_steps: Option<Vec<String>>,
}

impl ThoughtData {
    /// Parse and validate raw tool arguments.
    pub fn from_args(args: Value) -> Result<Self> {
        let data: Self = serde_json::from_value(args).context("Invalid thought data")?;
        if data.thought.trim().is_empty() {
            bail!("Invalid thought: must be a non-empty string");
        }
        if data.thought_number < 1 {
            bail!("Invalid thought_number: must be at least 1");
        }
        if data.total_thoughts < 1 {
            bail!("Invalid total_thoughts: must be at least 1");
        }
        for (name, value) in [
            ("revises_thought", data.revises_thought),
            ("branch_from_thought", data.branch_from_thought),
        ] {
            if value == Some(0) {
                bail!("Invalid {name}: must be at least 1");
            }
        }
        let steps = data
            .current_step
            .iter()
            .chain(data.previous_steps.iter().flatten());
        for tool in steps.flat_map(|s| &s.recommended_tools) {
            if !(0.0..=1.0).contains(&tool.confidence) {
                bail!(
                    "Invalid confidence for '{}': must be between 0 and 1",
                    tool.tool_name
                );
            }
        }
        Ok(data)
    }
}

/// Per-session thought history
#[derive(Debug, Default)]
pub struct SequentialThinking {
    history: Vec<ThoughtData>,
    branches: BTreeMap<String, Vec<ThoughtData>>,
}

impl SequentialThinking {
    /// Create an empty history
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded thoughts
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Branch identifiers, sorted
    #[must_use]
    pub fn branch_ids(&self) -> Vec<String> {
        self.branches.keys().cloned().collect()
    }

    /// JSON Schema for the tool arguments.
    #[must_use]
    pub fn input_schema() -> Value {
        let step = json!({
            "type": "object",
            "properties": {
                "step_description": { "type": "string", "description": "What needs to be done" },
                "recommended_tools": {
                    "type": "array",
                    "description": "Tools recommended for this step",
                    "items": {
                        "type": "object",
                        "properties": {
                            "tool_name": { "type": "string", "description": "Name of the tool being recommended" },
                            "confidence": { "type": "number", "minimum": 0, "maximum": 1, "description": "0-1 indicating confidence in recommendation" },
                            "rationale": { "type": "string", "description": "Why this tool is recommended" },
                            "priority": { "type": "number", "description": "Order in the recommendation sequence" },
                            "suggested_inputs": { "type": "object", "description": "Optional suggested parameters" },
                            "alternatives": { "type": "array", "items": { "type": "string" }, "description": "Alternative tools that could be used" }
                        },
                        "required": ["tool_name", "confidence", "rationale", "priority"]
                    }
                },
                "expected_outcome": { "type": "string", "description": "What to expect from this step" },
                "next_step_conditions": { "type": "array", "items": { "type": "string" }, "description": "Conditions to consider for the next step" }
            },
            "required": ["step_description", "recommended_tools", "expected_outcome"]
        });

        json!({
            "type": "object",
            "properties": {
                "thought": { "type": "string", "description": "Your current thinking step" },
                "next_thought_needed": { "type": "boolean", "description": "Whether another thought step is needed" },
                "thought_number": { "type": "integer", "minimum": 1, "description": "Current thought number" },
                "total_thoughts": { "type": "integer", "minimum": 1, "description": "Estimated total thoughts needed" },
                "is_revision": { "type": "boolean", "description": "Whether this revises previous thinking" },
                "revises_thought": { "type": "integer", "minimum": 1, "description": "Which thought is being reconsidered" },
                "branch_from_thought": { "type": "integer", "minimum": 1, "description": "Branching point thought number" },
                "branch_id": { "type": "string", "description": "Branch identifier" },
                "needs_more_thoughts": { "type": "boolean", "description": "If more thoughts are needed" },
                "current_step": step.clone(),
                "previous_steps": { "type": "array", "items": step, "description": "Steps already recommended" },
                "remaining_steps": { "type": "array", "items": { "type": "string" }, "description": "High-level descriptions of upcoming steps" }
            },
            "required": ["thought", "next_thought_needed", "thought_number", "total_thoughts"]
        })
    }

    /// Record one thought and answer with a JSON summary.
    ///
    /// Invalid input yields `{"error", "status": "failed"}` with the error
    /// flag set; history is left untouched.
    pub fn process(&mut self, args: Value) -> ToolResponse {
        match self.record(args) {
            Ok(summary) => ToolResponse::text(pretty(&summary)),
            Err(e) => ToolResponse {
                text: pretty(&json!({ "error": format!("{e:#}"), "status": "failed" })),
                is_error: true,
                metadata: None,
            },
        }
    }

    fn record(&mut self, args: Value) -> Result<Value> {
        let mut data = ThoughtData::from_args(args)?;

        if data.thought_number > data.total_thoughts {
            data.total_thoughts = data.thought_number;
        }
        if let Some(step) = &data.current_step {
            data.previous_steps
                .get_or_insert_with(Vec::new)
                .push(step.clone());
        }

        self.history.push(data.clone());
        if let (Some(_), Some(branch_id)) = (data.branch_from_thought, &data.branch_id) {
            self.branches
                .entry(branch_id.clone())
                .or_default()
                .push(data.clone());
        }

        eprintln!("{}", render_thought(&data));

        Ok(json!({
            "thought_number": data.thought_number,
            "total_thoughts": data.total_thoughts,
            "next_thought_needed": data.next_thought_needed,
            "branches": self.branch_ids(),
            "thought_history_length": self.history.len(),
            "current_step": data.current_step,
            "previous_steps": data.previous_steps,
            "remaining_steps": data.remaining_steps,
        }))
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Plain-text rendering of a step recommendation.
#[must_use]
pub fn format_recommendation(step: &StepRecommendation) -> String {
    let tools: Vec<String> = step
        .recommended_tools
        .iter()
        .map(|tool| {
            let alternatives = tool
                .alternatives
                .as_ref()
                .filter(|a| !a.is_empty())
                .map(|a| format!(" (alternatives: {})", a.join(", ")))
                .unwrap_or_default();
            let inputs = tool
                .suggested_inputs
                .as_ref()
                .map(|i| format!("\n    Suggested inputs: {}", Value::Object(i.clone())))
                .unwrap_or_default();
            format!(
                "  - {} (priority: {}){alternatives}\n    Rationale: {}{inputs}",
                tool.tool_name, tool.priority, tool.rationale
            )
        })
        .collect();

    let mut out = format!(
        "Step: {}\nRecommended Tools:\n{}\nExpected Outcome: {}",
        step.step_description,
        tools.join("\n"),
        step.expected_outcome
    );
    if let Some(conditions) = &step.next_step_conditions {
        out.push_str("\nConditions for next step:\n  - ");
        out.push_str(&conditions.join("\n  - "));
    }
    out
}

/// Boxed, coloured rendering of a thought for the server's stderr.
#[must_use]
pub fn render_thought(data: &ThoughtData) -> String {
    let (label, colored_label, context) = if data.is_revision == Some(true) {
        let label = "🔄 Revision";
        let context = data
            .revises_thought
            .map(|n| format!(" (revising thought {n})"))
            .unwrap_or_default();
        (label, label.yellow(), context)
    } else if let Some(from) = data.branch_from_thought {
        let label = "🌿 Branch";
        let context = format!(
            " (from thought {from}, ID: {})",
            data.branch_id.as_deref().unwrap_or("none")
        );
        (label, label.green(), context)
    } else {
        let label = "💭 Thought";
        (label, label.blue(), String::new())
    };

    let counter = format!("{}/{}{context}", data.thought_number, data.total_thoughts);
    let header_plain = format!("{label} {counter}");
    let header = format!("{colored_label} {counter}");

    let mut content = data.thought.clone();
    if let Some(step) = &data.current_step {
        content = format!("{content}\n\nRecommendation:\n{}", format_recommendation(step));
    }

    let width = content
        .lines()
        .map(|l| l.chars().count())
        .chain(std::iter::once(header_plain.chars().count()))
        .max()
        .unwrap_or(0);
    let border = "─".repeat(width + 2);
    let pad = |text: &str, visible: usize| format!("│ {text}{} │", " ".repeat(width - visible));

    let mut lines = vec![
        format!("┌{border}┐"),
        pad(&header, header_plain.chars().count()),
        format!("├{border}┤"),
    ];
    lines.extend(content.lines().map(|l| pad(l, l.chars().count())));
    lines.push(format!("└{border}┘"));
    lines.join("\n")
}
