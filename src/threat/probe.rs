//! Capture-software probes

use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{Error, Result};

/// Known screen recorders, matched against lowercased process names
pub const DEFAULT_BLOCKLIST: &[&str] = &[
    "obs",
    "obs64",
    "obs-studio",
    "camtasia",
    "camtasiastudio",
    "camrecorder",
    "bandicam",
    "sharex",
    "snagit32",
    "snagiteditor",
    "fraps",
    "simplescreenrecorder",
    "kazam",
    "vokoscreen",
    "vokoscreenng",
    "peek",
    "loom",
    "screenflow",
    "gpu-screen-recorder",
    "wf-recorder",
];

/// Probe outcome
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub detected: bool,
    pub processes: Vec<String>,
}

impl ProbeReport {
    pub fn matched(processes: Vec<String>) -> Self {
        Self {
            detected: !processes.is_empty(),
            processes,
        }
    }
}

/// Detector for active capture software
#[async_trait]
pub trait CaptureProbe: Send + Sync {
    async fn check(&self) -> Result<ProbeReport>;
}

/// Source of running process names
pub trait ProcessSource: Send + Sync {
    fn process_names(&self) -> Result<Vec<String>>;
}

/// Reads `<root>/<pid>/comm` entries of a procfs mount
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
}

impl ProcFs {
    pub fn new() -> Self {
        Self::at("/proc")
    }

    pub fn at(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSource for ProcFs {
    fn process_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let is_pid = entry
                .file_name()
                .to_str()
                .map(|name| name.chars().all(|c| c.is_ascii_digit()))
                .unwrap_or(false);
            if !is_pid {
                continue;
            }
            // processes may exit between listing and reading
            if let Ok(comm) = fs::read_to_string(entry.path().join("comm")) {
                names.push(comm.trim().to_string());
            }
        }
        Ok(names)
    }
}

/// Matches running processes against a recorder blocklist
pub struct ProcessScanProbe {
    source: Arc<dyn ProcessSource>,
    blocklist: BTreeSet<String>,
}

impl std::fmt::Debug for ProcessScanProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessScanProbe")
            .field("blocklist", &self.blocklist)
            .finish()
    }
}

impl ProcessScanProbe {
    pub fn new(source: Arc<dyn ProcessSource>) -> Self {
        Self::with_blocklist(source, DEFAULT_BLOCKLIST.iter().copied())
    }

    pub fn with_blocklist<I, S>(source: Arc<dyn ProcessSource>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            source,
            blocklist: names.into_iter().map(|n| normalize(n.as_ref())).collect(),
        }
    }

    fn scan(&self, names: Vec<String>) -> ProbeReport {
        let matched: BTreeSet<String> = names
            .iter()
            .map(|n| normalize(n))
            .filter(|n| self.blocklist.contains(n))
            .collect();
        ProbeReport::matched(matched.into_iter().collect())
    }
}

/// Lowercase, without a Windows executable suffix
fn normalize(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    lower
        .strip_suffix(".exe")
        .map(str::to_string)
        .unwrap_or(lower)
}

#[async_trait]
impl CaptureProbe for ProcessScanProbe {
    #[instrument(skip(self))]
    async fn check(&self) -> Result<ProbeReport> {
        let source = self.source.clone();
        let names = tokio::task::spawn_blocking(move || source.process_names())
            .await
            .map_err(|e| Error::IoError(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

        let report = self.scan(names);
        debug!("Process scan: detected={} {:?}", report.detected, report.processes);
        Ok(report)
    }
}
