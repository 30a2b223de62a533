//! Remote parameter writer
//!
//! Every key is rewritten in place with a line-anchored substitution
//! (`^KEY.*$` becomes `KEY VALUE`), so re-running a push is idempotent. A key
//! with no matching line is left absent; the batch reports it so the operator
//! can seed the placeholder.
//!
//! All keys of one role go out as a single script with a single `sed -i`, so
//! a protocol process starting concurrently sees either the old file or the
//! new one.

use super::{shell_path, shell_quote, RemoteLayout, RemoteShell};
use crate::config::{DeploymentTarget, Role};
use crate::error::{LaunchError, LaunchResult};
use crate::plan::RoleParameterSet;
use tracing::{debug, info, warn};

/// Prefix of the diagnostic line printed for keys missing from the file
pub const MISSING_KEY_MARKER: &str = "gwas-launch:missing-key";

/// Outcome of one role's batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReport {
    pub role: Role,
    pub file: String,
    pub keys_written: usize,
    /// Keys with no line in the remote file; their substitution was a no-op
    pub missing_keys: Vec<String>,
}

/// Escape text for the replacement side of `s|...|...|`
fn escape_replacement(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '&' | '|') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Escape text for the pattern side of `s|...|...|` (basic regex)
fn escape_pattern(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '|' | '.' | '*' | '[' | ']' | '^' | '$') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// sed expression rewriting the line of `key`
pub fn substitution(key: &str, value: &str) -> String {
    format!(
        "s|^{}.*$|{} {}|",
        escape_pattern(key),
        escape_replacement(key),
        escape_replacement(value)
    )
}

/// Batched shell script applying `set` to `file`
pub fn substitution_script(file: &str, set: &RoleParameterSet) -> String {
    let mut script = String::from("set -e\n");
    script.push_str(&format!("F={}\n", shell_path(file)));
    script.push_str("test -f \"$F\" || { echo \"parameter file not found: $F\" >&2; exit 1; }\n");

    for key in set.keys() {
        let pattern = shell_quote(&format!("^{}", escape_pattern(key)));
        script.push_str(&format!(
            "grep -q {} \"$F\" || echo {}\n",
            pattern,
            shell_quote(&format!("{} {}", MISSING_KEY_MARKER, key))
        ));
    }

    if !set.is_empty() {
        script.push_str("sed -i");
        for (key, value) in set.iter() {
            script.push_str(" -e ");
            script.push_str(&shell_quote(&substitution(key, value)));
        }
        script.push_str(" \"$F\"\n");
    }

    script
}

/// Apply `set` to file contents the way the remote batch does
///
/// Returns the rewritten text and the keys that matched no line.
pub fn apply_to_text(text: &str, set: &RoleParameterSet) -> (String, Vec<String>) {
    let mut missing: Vec<String> = set
        .keys()
        .filter(|key| !text.lines().any(|line| line.starts_with(key)))
        .map(String::from)
        .collect();
    missing.dedup();

    let mut out = String::with_capacity(text.len());
    for segment in text.split_inclusive('\n') {
        let (line, newline) = match segment.strip_suffix('\n') {
            Some(line) => (line, "\n"),
            None => (segment, ""),
        };
        let mut current = line.to_string();
        for (key, value) in set.iter() {
            if current.starts_with(key) {
                current = format!("{} {}", key, value);
            }
        }
        out.push_str(&current);
        out.push_str(newline);
    }

    (out, missing)
}

fn parse_missing(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| line.trim().strip_prefix(MISSING_KEY_MARKER))
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
        .collect()
}

/// Push one role's parameters to `target`
pub async fn apply(
    shell: &dyn RemoteShell,
    layout: &RemoteLayout,
    target: &DeploymentTarget,
    set: &RoleParameterSet,
) -> LaunchResult<WriteReport> {
    let role = set.role();
    let file = layout.par_file(role);
    let script = substitution_script(&file, set);
    debug!(%target, %role, keys = set.len(), "writing parameter batch");

    let output = shell.execute(target, &script).await.map_err(|e| match e {
        LaunchError::Transport { target, reason } => LaunchError::RemoteWrite { target, role, reason },
        other => other,
    })?;

    if !output.success() {
        return Err(LaunchError::RemoteWrite {
            target: target.clone(),
            role,
            reason: output.failure_reason(),
        });
    }

    let missing_keys = parse_missing(&output.stdout);
    for key in &missing_keys {
        warn!(%target, %role, key = %key, file = %file, "parameter key has no line in remote file; not written");
    }
    info!(%target, %role, keys = set.len(), missing = missing_keys.len(), "parameters written");

    Ok(WriteReport {
        role,
        file,
        keys_written: set.len().saturating_sub(missing_keys.len()),
        missing_keys,
    })
}

/// Push every role's parameters; stops at the first failed batch
pub async fn apply_all(
    shell: &dyn RemoteShell,
    layout: &RemoteLayout,
    target: &DeploymentTarget,
    sets: &[RoleParameterSet],
) -> LaunchResult<Vec<WriteReport>> {
    let mut reports = Vec::with_capacity(sets.len());
    for set in sets {
        reports.push(apply(shell, layout, target, set).await?);
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::local::LocalShell;
    use std::fs;

    const SEEDED: &str = "\
NUM_INDS 0
NUM_SNPS 0
PORT_P0_P1 0
IP_ADDR_P0 0.0.0.0
ITER_PER_EVAL 5
";

    fn sample_set() -> RoleParameterSet {
        let mut set = RoleParameterSet::new(Role::Cp1);
        set.push("NUM_INDS", "1000 1200");
        set.push("NUM_SNPS", "50000");
        set.push("PORT_P0_P1", "8000 8040");
        set.push("IP_ADDR_P0", "10.0.0.2");
        set
    }

    fn target() -> DeploymentTarget {
        DeploymentTarget::new("local", "none", "localhost")
    }

    fn seeded_layout() -> (tempfile::TempDir, RemoteLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = RemoteLayout::new(dir.path().to_str().unwrap(), dir.path().to_str().unwrap());
        fs::create_dir_all(layout.par_dir()).unwrap();
        fs::write(layout.par_file(Role::Cp1), SEEDED).unwrap();
        (dir, layout)
    }

    #[test]
    fn test_apply_to_text() {
        let (text, missing) = apply_to_text(SEEDED, &sample_set());
        assert!(missing.is_empty());
        assert!(text.contains("NUM_INDS 1000 1200\n"));
        assert!(text.contains("PORT_P0_P1 8000 8040\n"));
        assert!(text.contains("ITER_PER_EVAL 5\n"));
        assert_eq!(text.lines().count(), SEEDED.lines().count());
    }

    #[test]
    fn test_apply_to_text_idempotent() {
        let set = sample_set();
        let (once, _) = apply_to_text(SEEDED, &set);
        let (twice, _) = apply_to_text(&once, &set);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_missing_key_is_noop() {
        let mut set = sample_set();
        set.push("NTL_NUM_THREADS", "2");
        let (text, missing) = apply_to_text(SEEDED, &set);
        assert_eq!(missing, vec!["NTL_NUM_THREADS".to_string()]);
        assert!(!text.contains("NTL_NUM_THREADS"));
    }

    #[test]
    fn test_escaping() {
        assert_eq!(substitution("KEY", "a|b&c"), r"s|^KEY.*$|KEY a\|b\&c|");
        assert_eq!(escape_replacement(r"x\y"), r"x\\y");
    }

    #[tokio::test]
    async fn test_remote_apply_matches_preview() {
        let (_dir, layout) = seeded_layout();
        let shell = LocalShell::new();
        let set = sample_set();

        let report = apply(&shell, &layout, &target(), &set).await.unwrap();
        assert_eq!(report.keys_written, 4);
        assert!(report.missing_keys.is_empty());

        let written = fs::read_to_string(layout.par_file(Role::Cp1)).unwrap();
        assert_eq!(written, apply_to_text(SEEDED, &set).0);
    }

    #[tokio::test]
    async fn test_remote_apply_twice_is_identical() {
        let (_dir, layout) = seeded_layout();
        let shell = LocalShell::new();
        let set = sample_set();

        apply(&shell, &layout, &target(), &set).await.unwrap();
        let once = fs::read_to_string(layout.par_file(Role::Cp1)).unwrap();
        apply(&shell, &layout, &target(), &set).await.unwrap();
        let twice = fs::read_to_string(layout.par_file(Role::Cp1)).unwrap();
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn test_remote_reports_missing_keys() {
        let (_dir, layout) = seeded_layout();
        let mut set = sample_set();
        set.push("CACHE_FILE_PREFIX", "../cache/ds0_p1 ../cache/ds1_p1");

        let report = apply(&LocalShell::new(), &layout, &target(), &set).await.unwrap();
        assert_eq!(report.missing_keys, vec!["CACHE_FILE_PREFIX".to_string()]);
        assert_eq!(report.keys_written, 4);
    }

    #[tokio::test]
    async fn test_remote_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let layout = RemoteLayout::new(dir.path().to_str().unwrap(), dir.path().to_str().unwrap());

        let err = apply(&LocalShell::new(), &layout, &target(), &sample_set())
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::RemoteWrite { role: Role::Cp1, .. }));
    }

    #[tokio::test]
    async fn test_value_with_special_characters() {
        let (_dir, layout) = seeded_layout();
        let mut set = RoleParameterSet::new(Role::Cp1);
        set.push("IP_ADDR_P0", "a|b & 'c'");

        apply(&LocalShell::new(), &layout, &target(), &set).await.unwrap();
        let written = fs::read_to_string(layout.par_file(Role::Cp1)).unwrap();
        assert!(written.contains("IP_ADDR_P0 a|b & 'c'\n"));
    }
}
