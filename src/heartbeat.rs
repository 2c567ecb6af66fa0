//! Heartbeat message heuristic.
//!
//! Maps a command's prefix and elapsed Executing duration onto a short,
//! human-readable progress message. Modeled as a pure function with a table,
//! per the design notes, so it is easy to test and to replace without
//! touching the queue processor that calls it.

use std::time::Duration;

struct Rule {
    prefix: &'static str,
    min: Duration,
    max: Duration,
    message: &'static str,
}

const RULES: &[Rule] = &[
    Rule {
        prefix: "!analyze",
        min: Duration::from_secs(0),
        max: Duration::from_secs(30),
        message: "Starting crash analysis…",
    },
    Rule {
        prefix: "!analyze",
        min: Duration::from_secs(30),
        max: Duration::from_secs(120),
        message: "Analyzing memory dumps and stack traces…",
    },
    Rule {
        prefix: "!analyze",
        min: Duration::from_secs(120),
        max: Duration::from_secs(300),
        message: "Still analyzing — this dump may have many threads or deep call stacks…",
    },
    Rule {
        prefix: "!analyze",
        min: Duration::from_secs(300),
        max: Duration::MAX,
        message: "Analysis is taking a long time; large or corrupted dumps can take several minutes…",
    },
    Rule {
        prefix: "!heap",
        min: Duration::from_secs(0),
        max: Duration::from_secs(60),
        message: "Walking the heap…",
    },
    Rule {
        prefix: "!heap",
        min: Duration::from_secs(60),
        max: Duration::MAX,
        message: "Heap walk is still running — large heaps take a while to enumerate…",
    },
    Rule {
        prefix: "lm",
        min: Duration::from_secs(0),
        max: Duration::MAX,
        message: "Loading module and symbol information…",
    },
    Rule {
        prefix: ".sympath",
        min: Duration::from_secs(0),
        max: Duration::MAX,
        message: "Resolving symbol path and downloading symbols…",
    },
    Rule {
        prefix: "!dump",
        min: Duration::from_secs(0),
        max: Duration::MAX,
        message: "Dumping structures — output may be large…",
    },
];

const DEFAULT_MESSAGE: &str = "Command is still executing…";

/// Produce a heartbeat message for `command_prefix` given `elapsed`.
///
/// `command_prefix` is matched case-insensitively against the start of the
/// full command text; callers typically pass the whole command since the
/// table only matches on prefixes anyway.
#[must_use]
pub fn heartbeat_message(command: &str, elapsed: Duration) -> String {
    let lower = command.trim_start().to_ascii_lowercase();
    RULES
        .iter()
        .find(|rule| {
            lower.starts_with(&rule.prefix.to_ascii_lowercase())
                && elapsed >= rule.min
                && elapsed < rule.max
        })
        .map(|rule| rule.message.to_string())
        .unwrap_or_else(|| DEFAULT_MESSAGE.to_string())
}

/// Human-friendly rendering of an elapsed duration, e.g. `"2m 15s"`.
#[must_use]
pub fn elapsed_display(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let minutes = total / 60;
    let seconds = total % 60;
    if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analyze_escalates_with_elapsed_time() {
        let early = heartbeat_message("!analyze -v", Duration::from_secs(10));
        let mid = heartbeat_message("!analyze -v", Duration::from_secs(60));
        assert_ne!(early, mid);
        assert!(mid.contains("Analyzing"));
    }

    #[test]
    fn unknown_prefix_falls_back_to_default() {
        let msg = heartbeat_message("k", Duration::from_secs(5));
        assert_eq!(msg, DEFAULT_MESSAGE);
    }

    #[test]
    fn matching_is_case_insensitive() {
        let msg = heartbeat_message("!ANALYZE -v", Duration::from_secs(5));
        assert!(msg.contains("analysis") || msg.contains("Analysis"));
    }

    #[test]
    fn elapsed_display_formats_minutes() {
        assert_eq!(elapsed_display(Duration::from_secs(135)), "2m 15s");
        assert_eq!(elapsed_display(Duration::from_secs(45)), "45s");
    }
}
