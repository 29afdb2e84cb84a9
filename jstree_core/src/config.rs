//! Config file format and path discovery (`§6.3`, `§4.9`).
//!
//! Line-oriented, dnsmasq-style: `optionName value`, `#` comments,
//! `[section]` headers. Two reserved sections get typed parsing
//! (`[sessions]`, `[hot-snippets]`); everything else is a bag of raw
//! string values per section, with unknown keys producing a warning
//! rather than an error.

use crate::prelude::*;

use compact_str::CompactString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const CONFIG_PATH_ENV: &str = "JSTREE_CONFIG";

/// `$XDG_CONFIG_HOME/jstree/jstree.conf` or `$HOME/.jstree/jstree.conf`,
/// mirroring the teacher's `rsvim`/`.rsvim` discovery order but for a
/// single flat config file rather than a script entry point.
fn candidate_paths(config_dir: &Path, home_dir: &Path) -> Vec<PathBuf> {
  vec![
    config_dir.join("jstree").join("jstree.conf"),
    home_dir.join(".jstree").join("jstree.conf"),
  ]
}

/// Locates the config file to load: the `JSTREE_CONFIG` environment
/// variable takes precedence; otherwise the first candidate under the
/// user's config/home directory that exists. A symlink on the final path
/// component is rejected outright rather than followed (`§6.3`).
pub fn discover_config_path() -> Option<PathBuf> {
  if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
    let path = PathBuf::from(path);
    return reject_symlink(path);
  }

  let config_dir = dirs::config_dir()?;
  let home_dir = dirs::home_dir()?;
  candidate_paths(&config_dir, &home_dir)
    .into_iter()
    .find(|p| p.exists())
    .and_then(reject_symlink)
}

fn reject_symlink(path: PathBuf) -> Option<PathBuf> {
  match fs::symlink_metadata(&path) {
    Ok(meta) if meta.file_type().is_symlink() => {
      warn!(path = %path.display(), "config path rejected: final component is a symlink");
      None
    }
    _ => Some(path),
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionsConfig {
  pub max_age_days: Option<u32>,
  pub max_count: Option<u32>,
  pub max_size_mb: Option<u32>,
  pub auto_cleanup_enabled: Option<bool>,
  pub cleanup_interval_hours: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HotSnippet {
  pub name: CompactString,
  pub text: CompactString,
  pub description: Option<CompactString>,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
  /// Raw `key -> value` pairs per section, including the unnamed
  /// top-level section under the empty string key. Unknown keys live
  /// here even for `[sessions]`/`[hot-snippets]`, alongside their typed
  /// projections below.
  pub sections: HashMap<CompactString, HashMap<CompactString, CompactString>>,
  pub sessions: SessionsConfig,
  pub hot_snippets: Vec<HotSnippet>,
}

fn parse_bool(value: &str) -> Option<bool> {
  match value.trim().to_ascii_lowercase().as_str() {
    "true" | "1" | "yes" | "on" => Some(true),
    "false" | "0" | "no" | "off" => Some(false),
    _ => None,
  }
}

impl Config {
  pub fn parse(source: &str) -> Self {
    let mut cfg = Config::default();
    let mut section = CompactString::from("");
    let mut last_snippet: Option<usize> = None;

    for raw_line in source.lines() {
      let line = raw_line.trim();
      if line.is_empty() || line.starts_with('#') {
        continue;
      }

      if line.starts_with('[') && line.ends_with(']') {
        section = CompactString::from(&line[1..line.len() - 1]);
        last_snippet = None;
        continue;
      }

      let (key, value) = match line.split_once(char::is_whitespace) {
        Some((k, v)) => (k, v.trim()),
        None => (line, ""),
      };

      cfg
        .sections
        .entry(section.clone())
        .or_default()
        .insert(CompactString::from(key), CompactString::from(value));

      match section.as_str() {
        "sessions" => apply_sessions_key(&mut cfg.sessions, key, value),
        "hot-snippets" => apply_hot_snippet(&mut cfg.hot_snippets, &mut last_snippet, key, value),
        _ => {}
      }
    }

    cfg
  }

  pub fn load_from_path(path: &Path) -> std::io::Result<Self> {
    let source = fs::read_to_string(path)?;
    Ok(Self::parse(&source))
  }

  pub fn get(&self, section: &str, key: &str) -> Option<&str> {
    self
      .sections
      .get(section)
      .and_then(|s| s.get(key))
      .map(|v| v.as_str())
  }
}

fn apply_sessions_key(sessions: &mut SessionsConfig, key: &str, value: &str) {
  match key {
    "maxAgeDays" => sessions.max_age_days = value.parse().ok(),
    "maxCount" => sessions.max_count = value.parse().ok(),
    "maxSizeMB" => sessions.max_size_mb = value.parse().ok(),
    "autoCleanupEnabled" => sessions.auto_cleanup_enabled = parse_bool(value),
    "cleanupIntervalHours" => sessions.cleanup_interval_hours = value.parse().ok(),
    other => warn!(key = other, "unknown [sessions] config key"),
  }
}

fn apply_hot_snippet(snippets: &mut Vec<HotSnippet>, last: &mut Option<usize>, key: &str, value: &str) {
  if key == "description" || key.ends_with(".description") {
    if let Some(idx) = *last {
      snippets[idx].description = Some(CompactString::from(value));
    } else {
      warn!("hot-snippets .description with no preceding snippet");
    }
    return;
  }

  let text = value.replace("\\n", "\n");
  snippets.push(HotSnippet {
    name: CompactString::from(key),
    text: CompactString::from(text),
    description: None,
  });
  *last = Some(snippets.len() - 1);
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_sessions_section() {
    let cfg = Config::parse(
      "[sessions]\nmaxAgeDays 30\nmaxCount 10\nautoCleanupEnabled yes\nbogusKey value\n",
    );
    assert_eq!(cfg.sessions.max_age_days, Some(30));
    assert_eq!(cfg.sessions.max_count, Some(10));
    assert_eq!(cfg.sessions.auto_cleanup_enabled, Some(true));
    assert_eq!(
      cfg.get("sessions", "bogusKey"),
      Some("value")
    );
  }

  #[test]
  fn parses_hot_snippets_with_description() {
    let cfg = Config::parse(
      "[hot-snippets]\ngreet console.log('hi')\\nconsole.log('bye')\ngreet.description says hi then bye\n",
    );
    assert_eq!(cfg.hot_snippets.len(), 1);
    let snippet = &cfg.hot_snippets[0];
    assert_eq!(snippet.name.as_str(), "greet");
    assert_eq!(snippet.text.as_str(), "console.log('hi')\nconsole.log('bye')");
    assert_eq!(snippet.description.as_deref(), Some("says hi then bye"));
  }

  #[test]
  fn ignores_comments_and_blank_lines() {
    let cfg = Config::parse("# a comment\n\n[general]\nfoo bar\n");
    assert_eq!(cfg.get("general", "foo"), Some("bar"));
  }

  #[test]
  fn boolean_variants_all_parse() {
    for (input, expected) in [
      ("true", true),
      ("1", true),
      ("yes", true),
      ("on", true),
      ("false", false),
      ("0", false),
      ("no", false),
      ("off", false),
    ] {
      assert_eq!(parse_bool(input), Some(expected));
    }
  }
}
