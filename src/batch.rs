//! Batch Planner (component C).
//!
//! Decides which queued commands may ride together in a single CDB
//! round-trip, renders the composed input, and splits the adapter's output
//! back into per-command results. Plan selection is pure and synchronous;
//! the "wait up to `batch_wait` for more arrivals" policy lives in the queue
//! processor (D), which calls [`plan`] again once more commands have
//! arrived or the wait elapses.

use crate::config::EngineConfig;
use std::collections::HashMap;

/// Literal prefix for per-command markers inside a batched submission.
/// Combined with the uppercased command id: `SEP_<ID>_START` / `SEP_<ID>_END`.
const SEPARATOR_PREFIX: &str = "SEP_";

/// One command as scheduled into a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCommand {
    pub id: String,
    pub text: String,
}

/// Per-command outcome of splitting a batch's raw output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Output(String),
    Failed(String),
}

/// True iff `text` is allowed to ride in a batch under the current config:
/// batching is enabled and no excluded prefix matches.
#[must_use]
pub fn is_batchable(config: &EngineConfig, text: &str) -> bool {
    config.batch_enabled && !config.is_batch_excluded(text)
}

/// Form a plan from the head of an ordered queue snapshot: `queued[0]`
/// always enters the plan (batchable or not). If it is batchable, continue
/// draining non-blockingly until `batch_max_size` or the first
/// non-batchable command, which is left for the next cycle.
#[must_use]
pub fn plan(config: &EngineConfig, queued: &[(String, String)]) -> Vec<PlannedCommand> {
    let mut iter = queued.iter();
    let Some((first_id, first_text)) = iter.next() else {
        return Vec::new();
    };

    let head = PlannedCommand {
        id: first_id.clone(),
        text: first_text.clone(),
    };
    if !is_batchable(config, first_text) {
        return vec![head];
    }

    let mut planned = vec![head];
    for (id, text) in iter {
        if planned.len() >= config.batch_max_size {
            break;
        }
        if !is_batchable(config, text) {
            break;
        }
        planned.push(PlannedCommand {
            id: id.clone(),
            text: text.clone(),
        });
    }
    planned
}

/// Render the composed CDB input for a plan of 1..N commands. The adapter
/// wraps this in its own outer `.echo` START/END pair; no outer batch
/// markers are needed here.
#[must_use]
pub fn compose(planned: &[PlannedCommand]) -> String {
    planned
        .iter()
        .map(|p| {
            let label = p.id.to_ascii_uppercase();
            format!(
                ".echo {SEPARATOR_PREFIX}{label}_START; {text}; .echo {SEPARATOR_PREFIX}{label}_END",
                text = p.text
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Split the adapter's output (already stripped of the outer sentinels) into
/// a per-id outcome, matching markers by exact line content rather than
/// position so reordering by CDB doesn't misattribute output.
#[must_use]
pub fn parse(planned: &[PlannedCommand], adapter_output: &str) -> HashMap<String, BatchOutcome> {
    let lines: Vec<&str> = adapter_output.lines().collect();
    let mut results = HashMap::with_capacity(planned.len());

    for p in planned {
        let label = p.id.to_ascii_uppercase();
        let start_marker = format!("{SEPARATOR_PREFIX}{label}_START");
        let end_marker = format!("{SEPARATOR_PREFIX}{label}_END");

        let Some(start_line) = lines.iter().position(|l| *l == start_marker) else {
            results.insert(p.id.clone(), BatchOutcome::Failed("Start marker not found".to_string()));
            continue;
        };
        let Some(end_offset) = lines[start_line + 1..].iter().position(|l| *l == end_marker) else {
            results.insert(p.id.clone(), BatchOutcome::Failed("End marker for command".to_string()));
            continue;
        };
        let end_line = start_line + 1 + end_offset;
        let body = lines[start_line + 1..end_line].join("\n");
        results.insert(p.id.clone(), BatchOutcome::Output(body));
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_excluded(excluded: &[&str]) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.batch_excluded = excluded.iter().map(|s| s.to_string()).collect();
        config
    }

    #[test]
    fn solo_batch_parses_identically_to_unbatched() {
        let planned = vec![PlannedCommand {
            id: "cmd1".to_string(),
            text: "lm".to_string(),
        }];
        let composed = compose(&planned);
        assert_eq!(composed, ".echo SEP_CMD1_START; lm; .echo SEP_CMD1_END");

        let adapter_output = "SEP_CMD1_START\nModule list output\nSEP_CMD1_END";
        let parsed = parse(&planned, adapter_output);
        assert_eq!(
            parsed.get("cmd1"),
            Some(&BatchOutcome::Output("Module list output".to_string()))
        );
    }

    #[test]
    fn plan_stops_at_first_non_batchable_command() {
        let config = config_with_excluded(&["!analyze"]);
        let queued = vec![
            ("a".to_string(), "lm".to_string()),
            ("b".to_string(), "!analyze -v".to_string()),
            ("c".to_string(), "!threads".to_string()),
        ];
        let planned = plan(&config, &queued);
        assert_eq!(planned, vec![PlannedCommand { id: "a".into(), text: "lm".into() }]);
    }

    #[test]
    fn excluded_command_at_head_plans_solo() {
        let config = config_with_excluded(&["!analyze"]);
        let queued = vec![
            ("a".to_string(), "!analyze -v".to_string()),
            ("b".to_string(), "lm".to_string()),
        ];
        let planned = plan(&config, &queued);
        assert_eq!(planned, vec![PlannedCommand { id: "a".into(), text: "!analyze -v".into() }]);
    }

    #[test]
    fn plan_respects_batch_max_size() {
        let mut config = EngineConfig::default();
        config.batch_max_size = 2;
        let queued = vec![
            ("a".to_string(), "lm".to_string()),
            ("b".to_string(), "!threads".to_string()),
            ("c".to_string(), "!peb".to_string()),
        ];
        let planned = plan(&config, &queued);
        assert_eq!(planned.len(), 2);
    }

    #[test]
    fn parse_tolerates_reordering_by_label() {
        let planned = vec![
            PlannedCommand { id: "a".into(), text: "lm".into() },
            PlannedCommand { id: "b".into(), text: "!threads".into() },
        ];
        // CDB echoed command `b`'s block before `a`'s.
        let adapter_output = "SEP_B_START\nthread output\nSEP_B_END\nSEP_A_START\nmodule output\nSEP_A_END";
        let parsed = parse(&planned, adapter_output);
        assert_eq!(parsed.get("a"), Some(&BatchOutcome::Output("module output".to_string())));
        assert_eq!(parsed.get("b"), Some(&BatchOutcome::Output("thread output".to_string())));
    }

    #[test]
    fn parse_reports_missing_start_and_end_markers() {
        let planned = vec![
            PlannedCommand { id: "a".into(), text: "lm".into() },
            PlannedCommand { id: "b".into(), text: "!threads".into() },
        ];
        let adapter_output = "SEP_A_START\nmodule output\n"; // no end marker for a, nothing for b
        let parsed = parse(&planned, adapter_output);
        assert_eq!(
            parsed.get("a"),
            Some(&BatchOutcome::Failed("End marker for command".to_string()))
        );
        assert_eq!(
            parsed.get("b"),
            Some(&BatchOutcome::Failed("Start marker not found".to_string()))
        );
    }
}
