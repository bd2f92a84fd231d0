//! WP file YAML frontmatter: parsing, lane rewrite, dependency extraction.
//!
//! WP files carry a fixed-key-order frontmatter block delimited by `---`
//! lines. The `lane` field is a derived view of the event log (dual-write);
//! `dependencies` feeds the scheduler's graph. Rewrites only touch the
//! fields they must and preserve the rest of the file byte-for-byte.

use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::feature::WpId;
use crate::status::lane::Lane;

/// Parsed frontmatter fields the core cares about.
#[derive(Debug, Clone, Deserialize)]
pub struct WpFrontmatter {
    pub work_package_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub lane: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub agent: Option<String>,
}

/// Split a WP file into `(frontmatter_yaml, body)`.
///
/// Returns `None` when the file does not start with a frontmatter block.
#[must_use]
pub fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let rest = content.strip_prefix("---\n").or_else(|| {
        content
            .strip_prefix("---\r\n")
            .map(|r| r.trim_start_matches('\u{feff}'))
    })?;
    let end = rest.find("\n---")?;
    let yaml = &rest[..=end];
    let after = &rest[end + 4..];
    let body = after.strip_prefix('\n').unwrap_or(after);
    Some((yaml, body))
}

/// Parse a WP file's frontmatter.
pub fn parse_wp_file(path: &Path) -> Result<WpFrontmatter> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let (yaml, _) = split_frontmatter(&content).ok_or_else(|| {
        Error::validation(format!("WP file {} has no frontmatter", path.display()))
    })?;
    serde_yaml::from_str(yaml)
        .map_err(|e| Error::validation(format!("Invalid frontmatter in {}: {e}", path.display())))
}

/// Read the `lane:` value from a WP file, resolving aliases.
pub fn read_lane(path: &Path) -> Result<Option<Lane>> {
    let fm = parse_wp_file(path)?;
    fm.lane.as_deref().map(Lane::parse).transpose()
}

/// Declared dependency ids from a WP file.
pub fn read_dependencies(path: &Path) -> Result<Vec<WpId>> {
    let fm = parse_wp_file(path)?;
    fm.dependencies
        .iter()
        .map(|d| WpId::parse(d.trim()))
        .collect()
}

/// Rewrite only the `lane:` line of a WP file to the canonical lane.
///
/// Pre-cutover consumers read frontmatter directly, so the dual-write keeps
/// this view consistent with the snapshot. Lines outside the frontmatter
/// block are never touched.
pub fn write_lane(path: &Path, lane: Lane) -> Result<()> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let Some((yaml, _)) = split_frontmatter(&content) else {
        return Err(Error::validation(format!(
            "WP file {} has no frontmatter",
            path.display()
        )));
    };

    let mut replaced = false;
    let new_yaml: String = yaml
        .lines()
        .map(|line| {
            if !replaced && line.trim_start().starts_with("lane:") {
                replaced = true;
                format!("lane: {lane}")
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    let mut new_yaml = new_yaml;
    if !replaced {
        // Missing lane key: append it at the end of the block.
        if !new_yaml.is_empty() && !new_yaml.ends_with('\n') {
            new_yaml.push('\n');
        }
        new_yaml.push_str(&format!("lane: {lane}"));
    }
    if !new_yaml.ends_with('\n') {
        new_yaml.push('\n');
    }

    // content = "---\n" + yaml + "---" + tail, with yaml ending in '\n'.
    let tail_start = 4 + yaml.len() + 3;
    let tail = content.get(tail_start..).unwrap_or("");
    let rebuilt = format!("---\n{new_yaml}---{tail}");

    std::fs::write(path, rebuilt).map_err(|e| Error::io(path, e))?;
    Ok(())
}
