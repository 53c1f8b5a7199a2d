//! Remediation targets - where patches are sourced, tested and applied
//!
//! The coordinator never touches running code itself. A `RemediationTarget`
//! supplies the source at a location, renders a candidate against it,
//! provides regression tests, and owns the apply/rollback mechanism.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::config::HealingConfig;
use crate::patches::strategies::added_from_diff;
use crate::patches::{ApplyError, ApplyReceipt, ApprovedPatch, PatchApplier};
use crate::types::{BugReport, PatchCandidate, PatchTestCase};

#[async_trait]
pub trait RemediationTarget: PatchApplier {
    /// Current source at `location`.
    async fn original_source(&self, location: &str) -> anyhow::Result<String>;

    /// `original` with `candidate` applied, as the sandbox will execute it.
    async fn render_patch(
        &self,
        candidate: &PatchCandidate,
        original: &str,
    ) -> anyhow::Result<String>;

    /// Regression tests for `bug`. Should return at least one.
    async fn test_cases(&self, bug: &BugReport) -> anyhow::Result<Vec<PatchTestCase>>;

    /// First bug sequence number not already used by patches this target
    /// has on record. Bug ids must not collide with ids from earlier runs.
    fn next_bug_seq(&self) -> u64 {
        0
    }
}

/// Sequence number of a `bug-<n>` or `bug-<n>-<strategy>` id.
fn bug_seq_of(id: &str) -> Option<u64> {
    id.strip_prefix("bug-")?.split('-').next()?.parse().ok()
}

// ============================================================================
// Journal target
// ============================================================================

/// Input echoed by the smoke test
pub const SMOKE_INPUT: &str = "mender-smoke";

const HARNESS: &str = "read -r input\nprintf '%s\\n' \"$input\"\n";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JournalAction {
    Apply,
    Rollback,
}

/// One line of the apply journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalRecord {
    pub action: JournalAction,
    pub patch_id: String,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub details: serde_json::Value,
}

/// Default target: records patches in an append-only JSONL journal instead
/// of mutating anything.
///
/// Sources are a pass-through shell harness with the patch's added lines
/// carried as comments, so validation exercises the sandbox path end to end
/// without executing template code. The applied set is rebuilt from the
/// journal on open, so rollbacks survive restarts.
pub struct JournalTarget {
    journal_path: PathBuf,
    test_suite_path: Option<PathBuf>,
    default_timeout_ms: u64,
    applied: Mutex<HashSet<String>>,
    next_bug_seq: u64,
}

impl JournalTarget {
    pub fn open(config: &HealingConfig, default_timeout_ms: u64) -> anyhow::Result<Self> {
        let journal_path = PathBuf::from(&config.journal_path);
        let replay = replay_journal(&journal_path)?;
        if replay.records > 0 {
            info!(
                journal = %journal_path.display(),
                applied = replay.applied.len(),
                next_bug_seq = replay.next_bug_seq,
                "Restored applied patches from journal"
            );
        }
        Ok(Self {
            journal_path,
            test_suite_path: config.test_suite_path.as_ref().map(PathBuf::from),
            default_timeout_ms,
            applied: Mutex::new(replay.applied),
            next_bug_seq: replay.next_bug_seq,
        })
    }

    pub fn journal_path(&self) -> &Path {
        &self.journal_path
    }

    pub fn is_applied(&self, patch_id: &str) -> bool {
        self.applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(patch_id)
    }

    fn smoke_test(&self) -> PatchTestCase {
        PatchTestCase {
            name: "smoke".to_string(),
            input: json!(SMOKE_INPUT),
            expected_output: json!(SMOKE_INPUT),
            timeout_ms: self.default_timeout_ms,
        }
    }

    async fn append(&self, record: &JournalRecord) -> anyhow::Result<()> {
        if let Some(parent) = self.journal_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.journal_path)
            .await
            .with_context(|| format!("opening journal {}", self.journal_path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// What a journal replay recovers.
#[derive(Debug, Default)]
struct Replay {
    records: usize,
    /// Patch ids applied and not since rolled back
    applied: HashSet<String>,
    next_bug_seq: u64,
}

fn replay_journal(path: &Path) -> anyhow::Result<Replay> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Replay::default()),
        Err(e) => {
            return Err(e).with_context(|| format!("reading journal {}", path.display()))
        }
    };
    let mut replay = Replay::default();
    for (n, line) in text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
        let record = match serde_json::from_str::<JournalRecord>(line) {
            Ok(r) => r,
            Err(e) => {
                warn!(line = n + 1, error = %e, "Skipping malformed journal line");
                continue;
            }
        };
        replay.records += 1;
        if let Some(seq) = bug_seq_of(&record.patch_id) {
            replay.next_bug_seq = replay.next_bug_seq.max(seq + 1);
        }
        match record.action {
            JournalAction::Apply => {
                replay.applied.insert(record.patch_id);
            }
            JournalAction::Rollback => {
                replay.applied.remove(&record.patch_id);
            }
        }
    }
    Ok(replay)
}

#[async_trait]
impl PatchApplier for JournalTarget {
    async fn apply(&self, patch: &ApprovedPatch) -> Result<ApplyReceipt, ApplyError> {
        let candidate = patch.candidate();
        let fingerprint = format!("MD5-{:x}", md5::compute(candidate.diff.as_bytes()));
        let record = JournalRecord {
            action: JournalAction::Apply,
            patch_id: candidate.id.clone(),
            at: Utc::now(),
            details: json!({
                "bug_id": candidate.bug_id,
                "strategy": candidate.strategy,
                "fingerprint": fingerprint,
                "overall_confidence": patch.validation().overall_confidence,
                "diff": candidate.diff,
            }),
        };
        self.append(&record)
            .await
            .map_err(|source| ApplyError::Failed {
                patch_id: candidate.id.clone(),
                source,
            })?;
        self.applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(candidate.id.clone());

        info!(patch_id = %candidate.id, %fingerprint, "Patch journaled");
        Ok(ApplyReceipt {
            patch_id: candidate.id.clone(),
            fingerprint,
            applied_at: record.at,
        })
    }

    async fn rollback(&self, patch_id: &str, reason: &str) -> Result<(), ApplyError> {
        if !self.is_applied(patch_id) {
            return Err(ApplyError::NotApplied(patch_id.to_string()));
        }
        let record = JournalRecord {
            action: JournalAction::Rollback,
            patch_id: patch_id.to_string(),
            at: Utc::now(),
            details: json!({ "reason": reason }),
        };
        self.append(&record)
            .await
            .map_err(|source| ApplyError::Failed {
                patch_id: patch_id.to_string(),
                source,
            })?;
        self.applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(patch_id);
        info!(patch_id, reason, "Patch rolled back in journal");
        Ok(())
    }
}

#[async_trait]
impl RemediationTarget for JournalTarget {
    async fn original_source(&self, location: &str) -> anyhow::Result<String> {
        Ok(format!("# {}\n{HARNESS}", location.replace('\n', " ")))
    }

    async fn render_patch(
        &self,
        candidate: &PatchCandidate,
        original: &str,
    ) -> anyhow::Result<String> {
        let (header, body) = original.split_once('\n').unwrap_or((original, ""));
        let mut patched = format!("{header}\n# patch {}\n", candidate.id);
        for line in added_from_diff(&candidate.diff) {
            patched.push_str("# + ");
            patched.push_str(line);
            patched.push('\n');
        }
        patched.push_str(body);
        Ok(patched)
    }

    async fn test_cases(&self, _bug: &BugReport) -> anyhow::Result<Vec<PatchTestCase>> {
        let mut tests = vec![self.smoke_test()];
        if let Some(path) = &self.test_suite_path {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading test suite {}", path.display()))?;
            let suite: Vec<PatchTestCase> = serde_json::from_str(&text)
                .with_context(|| format!("parsing test suite {}", path.display()))?;
            tests.extend(suite);
        }
        Ok(tests)
    }

    fn next_bug_seq(&self) -> u64 {
        self.next_bug_seq
    }
}
