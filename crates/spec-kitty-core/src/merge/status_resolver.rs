//! Auto-resolution of conflicts in recognized status files.
//!
//! Only the feature's `tasks.md` and files under its `tasks/` directory
//! qualify. Conflict regions are resolved by content-type rule:
//!
//! - lane frontmatter: "more-done wins"
//!   (`done > for_review > in_progress > claimed > planned > blocked > canceled`,
//!   equal priority prefers ours)
//! - checkbox lines: `[x]` on either side wins
//! - history arrays: YAML-merged, deduplicated, sorted chronologically
//!
//! Any other region leaves the file unresolved for a human.

use std::sync::OnceLock;

use regex::Regex;

use crate::status::lane::Lane;

/// One conflict region between `<<<<<<<` and `>>>>>>>` markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictRegion {
    pub start_line: usize,
    pub end_line: usize,
    pub ours: String,
    pub theirs: String,
    pub original: String,
}

#[allow(clippy::expect_used)]
fn lane_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?m)^lane:\s*"?([a-z_]+)"?\s*$"#).expect("static regex"))
}

/// Is this path a recognized status file?
#[must_use]
pub fn is_status_file(path: &str) -> bool {
    let normalized = path.replace('\\', "/");
    if normalized.ends_with("/tasks.md") || normalized == "tasks.md" {
        return true;
    }
    if let Some(idx) = normalized.rfind("/tasks/") {
        return normalized[idx + "/tasks/".len()..].ends_with(".md");
    }
    normalized.starts_with("tasks/") && normalized.ends_with(".md")
}

/// Parse git conflict markers out of file content.
#[must_use]
pub fn parse_conflict_markers(content: &str) -> Vec<ConflictRegion> {
    let mut regions = Vec::new();
    let lines: Vec<&str> = content.lines().collect();
    let mut i = 0;
    while i < lines.len() {
        if lines[i].starts_with("<<<<<<<") {
            let start = i;
            let mut ours = String::new();
            let mut theirs = String::new();
            let mut j = i + 1;
            while j < lines.len() && !lines[j].starts_with("=======") {
                ours.push_str(lines[j]);
                ours.push('\n');
                j += 1;
            }
            let mut k = j + 1;
            while k < lines.len() && !lines[k].starts_with(">>>>>>>") {
                theirs.push_str(lines[k]);
                theirs.push('\n');
                k += 1;
            }
            if j < lines.len() && k < lines.len() {
                let original = lines[start..=k]
                    .iter()
                    .fold(String::new(), |mut acc, line| {
                        acc.push_str(line);
                        acc.push('\n');
                        acc
                    });
                regions.push(ConflictRegion {
                    start_line: start,
                    end_line: k,
                    ours,
                    theirs,
                    original,
                });
                i = k + 1;
                continue;
            }
            break;
        }
        i += 1;
    }
    regions
}

/// Extract the `lane:` value from a frontmatter fragment.
#[must_use]
pub fn extract_lane_value(content: &str) -> Option<String> {
    lane_line_regex()
        .captures(content)
        .map(|caps| caps[1].to_string())
}

/// Replace the `lane:` value in a frontmatter fragment.
#[must_use]
pub fn replace_lane_value(content: &str, lane: &str) -> String {
    lane_line_regex()
        .replace(content, format!("lane: {lane}"))
        .into_owned()
}

/// Resolve a lane conflict by the "more-done wins" policy.
///
/// Returns the winning side's content, or `None` when either side lacks a
/// readable lane.
#[must_use]
pub fn resolve_lane_conflict(ours: &str, theirs: &str) -> Option<String> {
    let our_lane = Lane::parse(&extract_lane_value(ours)?).ok()?;
    let their_lane = Lane::parse(&extract_lane_value(theirs)?).ok()?;
    // Equal priority prefers ours.
    if their_lane.merge_priority() > our_lane.merge_priority() {
        Some(theirs.to_string())
    } else {
        Some(ours.to_string())
    }
}

fn checkbox_parts(line: &str) -> Option<(bool, String)> {
    let trimmed = line.trim_start();
    let checked = trimmed.strip_prefix("- [x] ").or_else(|| trimmed.strip_prefix("- [X] "));
    if let Some(rest) = checked {
        return Some((true, rest.to_string()));
    }
    trimmed
        .strip_prefix("- [ ] ")
        .map(|rest| (false, rest.to_string()))
}

/// Resolve a checkbox conflict: prefer `[x]` on either side, line by line.
#[must_use]
pub fn resolve_checkbox_conflict(ours: &str, theirs: &str) -> String {
    let their_lines: Vec<&str> = theirs.lines().collect();
    let mut resolved: Vec<String> = Vec::new();
    for (idx, our_line) in ours.lines().enumerate() {
        let Some((our_checked, our_text)) = checkbox_parts(our_line) else {
            resolved.push(our_line.to_string());
            continue;
        };
        let their_checked = their_lines
            .iter()
            .filter_map(|l| checkbox_parts(l))
            .find(|(_, text)| *text == our_text)
            .or_else(|| their_lines.get(idx).and_then(|l| checkbox_parts(l)))
            .is_some_and(|(checked, _)| checked);
        let mark = if our_checked || their_checked { "x" } else { " " };
        resolved.push(format!("- [{mark}] {our_text}"));
    }
    let mut out = resolved.join("\n");
    if ours.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Merge two `history:` YAML fragments: union both lists, deduplicate by
/// identity, sort chronologically by timestamp.
#[must_use]
pub fn resolve_history_conflict(ours: &str, theirs: &str) -> Option<String> {
    #[derive(serde::Deserialize)]
    struct Fragment {
        #[serde(default)]
        history: Vec<serde_yaml::Value>,
    }

    let our_entries = serde_yaml::from_str::<Fragment>(ours).ok()?.history;
    let their_entries = serde_yaml::from_str::<Fragment>(theirs).ok()?.history;

    let mut merged: Vec<serde_yaml::Value> = Vec::new();
    for entry in our_entries.into_iter().chain(their_entries) {
        if !merged.contains(&entry) {
            merged.push(entry);
        }
    }
    if merged.is_empty() {
        return None;
    }
    merged.sort_by_key(|entry| {
        entry
            .get("timestamp")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .to_string()
    });

    let mut doc = serde_yaml::Mapping::new();
    doc.insert(
        serde_yaml::Value::String("history".to_string()),
        serde_yaml::Value::Sequence(merged),
    );
    serde_yaml::to_string(&doc).ok()
}

/// Resolve one region by content-type rule; `None` means a human must act.
#[must_use]
pub fn resolve_region(region: &ConflictRegion) -> Option<String> {
    if region.ours.contains("lane:") && region.theirs.contains("lane:") {
        return resolve_lane_conflict(&region.ours, &region.theirs);
    }
    if region.ours.trim_start().starts_with("history:")
        || region.theirs.trim_start().starts_with("history:")
    {
        return resolve_history_conflict(&region.ours, &region.theirs);
    }
    let looks_like_checkboxes = |s: &str| {
        let mut any = false;
        for line in s.lines() {
            if line.trim().is_empty() {
                continue;
            }
            if checkbox_parts(line).is_none() {
                return false;
            }
            any = true;
        }
        any
    };
    if looks_like_checkboxes(&region.ours) && looks_like_checkboxes(&region.theirs) {
        return Some(resolve_checkbox_conflict(&region.ours, &region.theirs));
    }
    None
}

/// Resolve every conflict region in a status file.
///
/// Returns the fully resolved content, or `None` when any region has no
/// applicable rule (the merge must pause for human resolution).
#[must_use]
pub fn resolve_status_file(content: &str) -> Option<String> {
    let regions = parse_conflict_markers(content);
    if regions.is_empty() {
        return Some(content.to_string());
    }
    let mut resolved = content.to_string();
    for region in &regions {
        let replacement = resolve_region(region)?;
        resolved = resolved.replacen(&region.original, &replacement, 1);
    }
    Some(resolved)
}
