//! Turn document sections and the `context.md` subsection layout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pandora_domain::ids::TurnId;
use pandora_domain::trace::Phase;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sections
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The named files inside a turn folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Context,
    Research,
    ToolResults,
    Transcript,
}

impl Section {
    pub fn filename(self) -> &'static str {
        match self {
            Section::Context => "context.md",
            Section::Research => "research.md",
            Section::ToolResults => "toolresults.md",
            Section::Transcript => "transcript.json",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// context.md skeleton
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Header line for a phase's subsection, e.g. `## §3 Plan`.
pub fn subsection_header(phase: Phase) -> String {
    format!("## §{} {}", phase.index(), phase.title())
}

/// The empty skeleton written by `open_turn`: a title plus the eight
/// subsection headers in phase order.
pub fn context_skeleton(turn_id: TurnId) -> String {
    let mut out = format!("# Turn {turn_id}\n");
    for phase in Phase::ALL {
        out.push('\n');
        out.push_str(&subsection_header(phase));
        out.push('\n');
    }
    out
}

/// Split `context.md` into the text of each subsection, by phase index.
/// Content before §0 (the title) is dropped.
pub fn split_subsections(content: &str) -> [String; 8] {
    let mut sections: [String; 8] = Default::default();
    let mut current: Option<usize> = None;

    for line in content.lines() {
        if let Some(idx) = parse_header_index(line) {
            current = Some(idx);
            continue;
        }
        if let Some(idx) = current {
            let buf = &mut sections[idx];
            if !buf.is_empty() || !line.trim().is_empty() {
                buf.push_str(line);
                buf.push('\n');
            }
        }
    }

    for section in sections.iter_mut() {
        let trimmed = section.trim_end().len();
        section.truncate(trimmed);
    }
    sections
}

/// Append `text` under the subsection for `phase`, returning the rewritten
/// document. The header must exist (the skeleton guarantees it).
pub fn append_to_subsection(content: &str, phase: Phase, text: &str) -> Option<String> {
    let target = phase.index();
    let mut out = String::with_capacity(content.len() + text.len() + 2);
    let mut in_target = false;
    let mut inserted = false;

    for line in content.lines() {
        if let Some(idx) = parse_header_index(line) {
            if in_target && !inserted {
                push_block(&mut out, text);
                inserted = true;
            }
            in_target = idx == target;
        }
        out.push_str(line);
        out.push('\n');
    }
    if in_target && !inserted {
        push_block(&mut out, text);
        inserted = true;
    }

    inserted.then_some(out)
}

fn push_block(out: &mut String, text: &str) {
    if !out.ends_with("\n\n") {
        out.push('\n');
    }
    out.push_str(text.trim_end());
    out.push('\n');
}

fn parse_header_index(line: &str) -> Option<usize> {
    let rest = line.strip_prefix("## §")?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    let idx: usize = digits.parse().ok()?;
    (idx < 8).then_some(idx)
}

/// Highest subsection index that currently has content, if any.
pub fn last_written_subsection(content: &str) -> Option<usize> {
    let sections = split_subsections(content);
    sections
        .iter()
        .enumerate()
        .filter(|(_, s)| !s.trim().is_empty())
        .map(|(i, _)| i)
        .max()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Close marker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a turn ended. Written once to `closed.json`; the turn is read-only
/// afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TurnOutcome {
    Saved,
    Cancelled,
    Failed {
        kind: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        phase: Option<String>,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseMarker {
    pub closed_at: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: TurnOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skeleton_has_all_eight_headers() {
        let skeleton = context_skeleton(7);
        assert!(skeleton.starts_with("# Turn 7\n"));
        for phase in Phase::ALL {
            assert!(
                skeleton.contains(&subsection_header(phase)),
                "missing header for {phase}"
            );
        }
    }

    #[test]
    fn append_lands_in_the_right_subsection() {
        let doc = context_skeleton(1);
        let doc = append_to_subsection(&doc, Phase::Planner, "route: synthesis").unwrap();
        let sections = split_subsections(&doc);
        assert_eq!(sections[3].trim(), "route: synthesis");
        assert!(sections[4].is_empty());
    }

    #[test]
    fn append_twice_accumulates_in_order() {
        let doc = context_skeleton(1);
        let doc = append_to_subsection(&doc, Phase::Synthesis, "draft one").unwrap();
        let doc = append_to_subsection(&doc, Phase::Synthesis, "draft two").unwrap();
        let sections = split_subsections(&doc);
        let body = &sections[6];
        let first = body.find("draft one").unwrap();
        let second = body.find("draft two").unwrap();
        assert!(first < second);
    }

    #[test]
    fn append_to_last_subsection_works_at_eof() {
        let doc = context_skeleton(1);
        let doc = append_to_subsection(&doc, Phase::Validation, "approved").unwrap();
        let sections = split_subsections(&doc);
        assert_eq!(sections[7].trim(), "approved");
    }

    #[test]
    fn last_written_tracks_highest_nonempty() {
        let doc = context_skeleton(1);
        assert_eq!(last_written_subsection(&doc), None);
        let doc = append_to_subsection(&doc, Phase::Analyzer, "intent: informational").unwrap();
        assert_eq!(last_written_subsection(&doc), Some(0));
        let doc = append_to_subsection(&doc, Phase::Context, "prior turns: none").unwrap();
        assert_eq!(last_written_subsection(&doc), Some(2));
    }

    #[test]
    fn close_marker_round_trip() {
        let marker = CloseMarker {
            closed_at: Utc::now(),
            outcome: TurnOutcome::Failed {
                kind: "phase_failed".into(),
                phase: Some("planner".into()),
                message: "parse error".into(),
            },
        };
        let json = serde_json::to_string(&marker).unwrap();
        assert!(json.contains("\"outcome\":\"failed\""));
        let parsed: CloseMarker = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed.outcome, TurnOutcome::Failed { .. }));
    }
}
