//! On-disk checks: critical-file integrity and recency, suspicious file
//! names in watched locations, and error lines in system logs.

use super::{Finding, Rule, Subject};
use crate::config::ScanConfig;
use crate::error::Result;
use crate::{io, paths};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::time::{Duration, SystemTime};
use walkdir::WalkDir;

/// Lines read from the end of each watched log.
pub const LOG_TAIL_LINES: usize = 100;
/// Bytes read from the end of a log file to find the tail lines.
const LOG_TAIL_BYTES: u64 = 64 * 1024;
const LOG_SAMPLE_LINES: usize = 3;

// ---------------------------------------------------------------------------
// Integrity baseline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrityDb {
    /// Configured path (before `~` expansion) to hex SHA-256.
    pub files: BTreeMap<String, String>,
    pub updated: Option<DateTime<Utc>>,
}

impl IntegrityDb {
    pub fn load(state_dir: &Path) -> Self {
        io::read_json_or_none(&paths::integrity_path(state_dir)).unwrap_or_default()
    }

    pub fn save(&mut self, state_dir: &Path) -> Result<()> {
        self.updated = Some(Utc::now());
        io::write_json(&paths::integrity_path(state_dir), self)
    }
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect())
}

/// Hash every readable critical file. Files not yet in the baseline are
/// added; a mismatch is reported and the stored hash is kept, so the finding
/// repeats until the baseline is reset.
pub fn check_integrity(cfg: &ScanConfig, state_dir: &Path) -> Result<Vec<Finding>> {
    let mut db = IntegrityDb::load(state_dir);
    let mut findings = Vec::new();
    let mut changed = false;

    for raw in &cfg.critical_files {
        let path = paths::expand_tilde(raw);
        let hash = match sha256_file(&path) {
            Ok(h) => h,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "skipping unreadable critical file");
                continue;
            }
        };
        match db.files.get(raw) {
            Some(known) if *known != hash => findings.push(Finding::new(
                Rule::IntegrityViolation,
                format!("{raw} changed since the integrity baseline"),
                Subject::File {
                    path: raw.clone(),
                    detail: format!("expected {}, found {}", &known[..12.min(known.len())], &hash[..12]),
                },
            )),
            Some(_) => {}
            None => {
                db.files.insert(raw.clone(), hash);
                changed = true;
            }
        }
    }

    if changed {
        db.save(state_dir)?;
    }
    Ok(findings)
}

/// Re-hash every critical file and replace the stored baseline.
pub fn reset_baseline(cfg: &ScanConfig, state_dir: &Path) -> Result<IntegrityDb> {
    let mut db = IntegrityDb::default();
    for raw in &cfg.critical_files {
        if let Ok(hash) = sha256_file(&paths::expand_tilde(raw)) {
            db.files.insert(raw.clone(), hash);
        }
    }
    db.save(state_dir)?;
    Ok(db)
}

// ---------------------------------------------------------------------------
// Recent modifications
// ---------------------------------------------------------------------------

pub fn recent_modifications(cfg: &ScanConfig, now: SystemTime) -> Vec<Finding> {
    let window = Duration::from_secs_f64(cfg.recent_window_days.max(0.0) * 86_400.0);
    let mut out = Vec::new();
    for raw in &cfg.critical_files {
        let path = paths::expand_tilde(raw);
        let Ok(modified) = std::fs::metadata(&path).and_then(|m| m.modified()) else {
            continue;
        };
        // Future mtimes count as recent.
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age < window {
            let when: DateTime<Utc> = modified.into();
            out.push(Finding::new(
                Rule::RecentModification,
                format!("{raw} modified recently"),
                Subject::File {
                    path: raw.clone(),
                    detail: format!("modified {}", when.format("%Y-%m-%d %H:%M:%S")),
                },
            ));
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Watched locations
// ---------------------------------------------------------------------------

pub fn malware_names(cfg: &ScanConfig) -> Vec<Finding> {
    let names: Vec<String> = cfg
        .suspicious_file_names
        .iter()
        .filter(|n| !n.trim().is_empty())
        .map(|n| n.to_lowercase())
        .collect();
    let mut out = Vec::new();
    for raw in &cfg.watched_locations {
        let dir = paths::expand_tilde(raw);
        if !dir.is_dir() {
            continue;
        }
        for entry in WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let file_name = entry.file_name().to_string_lossy().to_lowercase();
            if let Some(hit) = names.iter().find(|n| file_name.contains(n.as_str())) {
                out.push(Finding::new(
                    Rule::MalwareName,
                    format!("suspicious file name in {raw}"),
                    Subject::File {
                        path: entry.path().display().to_string(),
                        detail: format!("name contains '{hit}'"),
                    },
                ));
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

/// The last `n` lines of a file, reading at most the final 64 KiB.
pub fn tail_lines(path: &Path, n: usize) -> Result<Vec<String>> {
    let mut file = std::fs::File::open(path)?;
    let len = file.metadata()?.len();
    let start = len.saturating_sub(LOG_TAIL_BYTES);
    file.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    let text = String::from_utf8_lossy(&buf);
    let mut lines: Vec<&str> = text.lines().collect();
    // The first line is likely cut when we did not start at offset 0.
    if start > 0 && !lines.is_empty() {
        lines.remove(0);
    }
    let skip = lines.len().saturating_sub(n);
    Ok(lines[skip..].iter().map(|l| l.to_string()).collect())
}

fn is_error_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower.contains("error") || lower.contains("fail")
}

pub fn log_anomalies(cfg: &ScanConfig) -> Vec<Finding> {
    let mut out = Vec::new();
    for raw in &cfg.log_files {
        let path = paths::expand_tilde(raw);
        let lines = match tail_lines(&path, LOG_TAIL_LINES) {
            Ok(l) => l,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "skipping unreadable log");
                continue;
            }
        };
        let errors: Vec<&String> = lines.iter().filter(|l| is_error_line(l)).collect();
        if errors.is_empty() {
            continue;
        }
        out.push(Finding::new(
            Rule::LogAnomaly,
            format!("{} error lines in the tail of {raw}", errors.len()),
            Subject::Log {
                source: raw.clone(),
                errors: errors.len(),
                sample: errors
                    .iter()
                    .take(LOG_SAMPLE_LINES)
                    .map(|l| l.chars().take(200).collect())
                    .collect(),
            },
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cfg_with_file(path: &Path) -> ScanConfig {
        ScanConfig {
            critical_files: vec![path.display().to_string()],
            ..ScanConfig::default()
        }
    }

    #[test]
    fn sha256_known_value() {
        let dir = TempDir::new().unwrap();
        let p = dir.path().join("f");
        std::fs::write(&p, "abc").unwrap();
        assert_eq!(
            sha256_file(&p).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn integrity_baseline_then_violation() {
        let state = TempDir::new().unwrap();
        let files = TempDir::new().unwrap();
        let target = files.path().join("hosts");
        std::fs::write(&target, "127.0.0.1 localhost\n").unwrap();
        let cfg = cfg_with_file(&target);

        assert!(check_integrity(&cfg, state.path()).unwrap().is_empty());
        assert!(paths::integrity_path(state.path()).exists());
        assert!(check_integrity(&cfg, state.path()).unwrap().is_empty());

        std::fs::write(&target, "6.6.6.6 bank.example\n").unwrap();
        let f = check_integrity(&cfg, state.path()).unwrap();
        assert_eq!(f.len(), 1);
        assert_eq!(f[0].rule, Rule::IntegrityViolation);
        // Reported again until the baseline is reset.
        assert_eq!(check_integrity(&cfg, state.path()).unwrap().len(), 1);

        reset_baseline(&cfg, state.path()).unwrap();
        assert!(check_integrity(&cfg, state.path()).unwrap().is_empty());
    }

    #[test]
    fn missing_critical_files_are_skipped() {
        let state = TempDir::new().unwrap();
        let cfg = cfg_with_file(Path::new("/definitely/not/here"));
        assert!(check_integrity(&cfg, state.path()).unwrap().is_empty());
        assert!(recent_modifications(&cfg, SystemTime::now()).is_empty());
    }

    #[test]
    fn recent_modification_window() {
        let files = TempDir::new().unwrap();
        let target = files.path().join("passwd");
        std::fs::write(&target, "root:x:0:0\n").unwrap();
        let cfg = cfg_with_file(&target);

        assert_eq!(recent_modifications(&cfg, SystemTime::now()).len(), 1);
        let later = SystemTime::now() + Duration::from_secs(8 * 86_400);
        assert!(recent_modifications(&cfg, later).is_empty());
    }

    #[test]
    fn malware_names_in_watched_locations() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("com.apple.update.plist"), "").unwrap();
        std::fs::write(dir.path().join("CryptoMiner.plist"), "").unwrap();
        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/trojan"), "").unwrap();

        let cfg = ScanConfig {
            watched_locations: vec![dir.path().display().to_string(), "/nope".into()],
            ..ScanConfig::default()
        };
        let f = malware_names(&cfg);
        assert_eq!(f.len(), 1);
        assert_eq!(f[0].penalty, 15);
    }

    #[test]
    fn tail_lines_returns_last_n() {
        let dir = TempDir::new().unwrap();
        let p = dir.path().join("log");
        let body: String = (0..500).map(|i| format!("line {i}\n")).collect();
        std::fs::write(&p, body).unwrap();
        let tail = tail_lines(&p, 100).unwrap();
        assert_eq!(tail.len(), 100);
        assert_eq!(tail[0], "line 400");
        assert_eq!(tail[99], "line 499");
    }

    #[test]
    fn log_anomalies_count_errors_in_tail() {
        let dir = TempDir::new().unwrap();
        let noisy = dir.path().join("system.log");
        std::fs::write(&noisy, "ok\nkernel: ERROR disk\nauth failed for bob\nfine\n").unwrap();
        let quiet = dir.path().join("quiet.log");
        std::fs::write(&quiet, "all good\n").unwrap();

        let cfg = ScanConfig {
            log_files: vec![
                noisy.display().to_string(),
                quiet.display().to_string(),
                "/missing.log".into(),
            ],
            ..ScanConfig::default()
        };
        let f = log_anomalies(&cfg);
        assert_eq!(f.len(), 1);
        match &f[0].subject {
            Subject::Log { errors, sample, .. } => {
                assert_eq!(*errors, 2);
                assert_eq!(sample.len(), 2);
            }
            other => panic!("unexpected subject {other:?}"),
        }
    }
}
