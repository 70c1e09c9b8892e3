//! Threat state machine
//!
//! `CLEAR → SUSPECTED → CONFIRMED`. Signals are heuristics fed by the host
//! (focus, visibility, key chords) and by an optional capture probe. This is a
//! risk signal that hides content on suspicion; it is not a security boundary
//! and cannot stop a determined capture.
//!
//! The monitor is pure: callers pass the current instant and drive expiry with
//! [`ThreatMonitor::tick`] at [`ThreatMonitor::next_deadline`].

use std::{fmt, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::keys::{CapturePrecursor, Severity};
use super::probe::ProbeReport;
use crate::audit::{AuditLog, EventOrigin, SecurityEventType};
use crate::config::ThreatConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreatState {
    Clear,
    Suspected,
    Confirmed,
}

impl fmt::Display for ThreatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreatState::Clear => write!(f, "CLEAR"),
            ThreatState::Suspected => write!(f, "SUSPECTED"),
            ThreatState::Confirmed => write!(f, "CONFIRMED"),
        }
    }
}

/// Probe match that confirmed the threat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub processes: Vec<String>,
    pub at: DateTime<Utc>,
}

pub struct ThreatMonitor {
    state: ThreatState,
    focus_lost: bool,
    hidden: bool,
    restore_at: Option<Instant>,
    hidden_transitions: u32,
    detection: Option<Detection>,
    config: ThreatConfig,
    audit: Arc<AuditLog>,
    origin: EventOrigin,
}

impl fmt::Debug for ThreatMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreatMonitor")
            .field("state", &self.state)
            .field("focus_lost", &self.focus_lost)
            .field("hidden", &self.hidden)
            .field("restore_at", &self.restore_at)
            .finish()
    }
}

impl ThreatMonitor {
    pub fn new(config: ThreatConfig, audit: Arc<AuditLog>, origin: EventOrigin) -> Self {
        Self {
            state: ThreatState::Clear,
            focus_lost: false,
            hidden: false,
            restore_at: None,
            hidden_transitions: 0,
            detection: None,
            config,
            audit,
            origin,
        }
    }

    pub fn state(&self) -> ThreatState {
        self.state
    }

    pub fn is_clear(&self) -> bool {
        self.state == ThreatState::Clear
    }

    pub fn detection(&self) -> Option<&Detection> {
        self.detection.as_ref()
    }

    /// When [`tick`](Self::tick) may next change the state. None while a
    /// condition is held or nothing is pending.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.state != ThreatState::Suspected || self.holding() {
            return None;
        }
        self.restore_at
    }

    pub fn focus_lost(&mut self, now: Instant) -> ThreatState {
        if self.confirmed() {
            return self.state;
        }
        if !self.focus_lost {
            self.record(SecurityEventType::WindowBlur, "Window lost focus".to_string());
        }
        self.focus_lost = true;
        self.suspect(now, Duration::ZERO)
    }

    pub fn focus_returned(&mut self, now: Instant) -> ThreatState {
        if !self.focus_lost || self.confirmed() {
            return self.state;
        }
        self.focus_lost = false;
        self.extend(now + self.config.focus_return_grace());
        self.state
    }

    pub fn visibility_changed(&mut self, visible: bool, now: Instant) -> ThreatState {
        if self.confirmed() {
            return self.state;
        }
        if visible {
            if self.hidden {
                self.hidden = false;
                self.extend(now + self.config.focus_return_grace());
            }
            return self.state;
        }

        if !self.hidden {
            self.hidden = true;
            self.hidden_transitions += 1;
            self.record(
                SecurityEventType::VisibilityHidden,
                "Surface hidden".to_string(),
            );
            if self.hidden_transitions > self.config.visibility_alert_threshold {
                self.record(
                    SecurityEventType::SuspiciousActivity,
                    format!(
                        "Multiple visibility changes detected ({})",
                        self.hidden_transitions
                    ),
                );
            }
        }
        self.suspect(now, Duration::ZERO)
    }

    pub fn capture_key(&mut self, precursor: &CapturePrecursor, now: Instant) -> ThreatState {
        if self.confirmed() {
            return self.state;
        }
        self.record(precursor.kind, precursor.label.to_string());
        let grace = match precursor.severity {
            Severity::Capture => self.config.capture_key_grace(),
            Severity::Precaution => self.config.precaution_grace(),
            Severity::Critical => self.config.critical_grace(),
        };
        self.suspect(now, grace)
    }

    /// A probe that could not answer counts as a capture-level signal
    pub fn probe_failed(&mut self, reason: &str, now: Instant) -> ThreatState {
        if self.confirmed() {
            return self.state;
        }
        self.record(
            SecurityEventType::ProbeFailed,
            format!("Capture probe failed: {}", reason),
        );
        self.suspect(now, self.config.capture_key_grace())
    }

    /// A negative report adds nothing; a positive one is terminal
    pub fn probe_report(&mut self, report: &ProbeReport) -> ThreatState {
        if !report.detected || self.confirmed() {
            return self.state;
        }

        self.state = ThreatState::Confirmed;
        self.restore_at = None;
        self.detection = Some(Detection {
            processes: report.processes.clone(),
            at: Utc::now(),
        });
        error!(
            "🚨 Recording software detected: {}",
            report.processes.join(", ")
        );
        self.record(
            SecurityEventType::RecordingSoftwareDetected,
            format!(
                "Screen recording software detected: {}",
                report.processes.join(", ")
            ),
        );
        self.state
    }

    /// Restores CLEAR once nothing is held and the restore deadline passed
    pub fn tick(&mut self, now: Instant) -> ThreatState {
        if self.state != ThreatState::Suspected || self.holding() {
            return self.state;
        }
        if self.restore_at.map_or(true, |at| now >= at) {
            self.state = ThreatState::Clear;
            self.restore_at = None;
            info!("✅ Threat cleared, restoring content");
        }
        self.state
    }

    fn holding(&self) -> bool {
        self.focus_lost || self.hidden
    }

    fn confirmed(&self) -> bool {
        self.state == ThreatState::Confirmed
    }

    fn suspect(&mut self, now: Instant, grace: Duration) -> ThreatState {
        self.extend(now + grace);
        if self.state == ThreatState::Clear {
            self.state = ThreatState::Suspected;
            warn!("⚠️ Threat suspected, hiding content");
        }
        self.state
    }

    /// Moves the restore deadline later, never earlier
    fn extend(&mut self, until: Instant) {
        self.restore_at = Some(match self.restore_at {
            Some(current) if current > until => current,
            _ => until,
        });
    }

    fn record(&self, kind: SecurityEventType, message: String) {
        self.audit.record(kind, message, &self.origin);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threat::keys::{classify, KeyAction};
    use crate::surface::KeyEvent;

    fn monitor() -> (ThreatMonitor, Arc<AuditLog>) {
        let audit = Arc::new(AuditLog::new(100));
        let monitor = ThreatMonitor::new(
            ThreatConfig::default(),
            audit.clone(),
            EventOrigin::new(Some("alice".into()), Some("a.pdf".into())),
        );
        (monitor, audit)
    }

    fn precursor(event: KeyEvent) -> CapturePrecursor {
        match classify(&event) {
            KeyAction::Capture(p) => p,
            other => panic!("not a capture key: {:?}", other),
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_focus_loss_holds_until_return_plus_grace() {
        let (mut monitor, audit) = monitor();
        let t0 = Instant::now();

        assert_eq!(monitor.focus_lost(t0), ThreatState::Suspected);
        assert_eq!(monitor.next_deadline(), None);
        assert_eq!(monitor.tick(t0 + ms(10_000)), ThreatState::Suspected);

        let back = t0 + ms(10_000);
        monitor.focus_returned(back);
        assert_eq!(monitor.next_deadline(), Some(back + ms(500)));
        assert_eq!(monitor.tick(back + ms(499)), ThreatState::Suspected);
        assert_eq!(monitor.tick(back + ms(500)), ThreatState::Clear);
        assert_eq!(audit.count_of(SecurityEventType::WindowBlur), 1);
    }

    #[test]
    fn test_grace_windows_by_severity() {
        let t0 = Instant::now();
        let cases = [
            (KeyEvent::down("PrintScreen"), 1000),
            (KeyEvent::down("Meta"), 2000),
            (KeyEvent::down("s").with_meta().with_shift(), 3000),
            (KeyEvent::down("F12"), 3000),
        ];
        for (event, grace) in cases {
            let (mut monitor, _) = monitor();
            monitor.capture_key(&precursor(event), t0);
            assert_eq!(monitor.next_deadline(), Some(t0 + ms(grace)));
        }
    }

    #[test]
    fn test_deadline_never_shortens() {
        let (mut monitor, _) = monitor();
        let t0 = Instant::now();

        monitor.capture_key(&precursor(KeyEvent::down("F12")), t0);
        monitor.capture_key(&precursor(KeyEvent::down("PrintScreen")), t0 + ms(100));
        assert_eq!(monitor.next_deadline(), Some(t0 + ms(3000)));

        monitor.capture_key(&precursor(KeyEvent::down("Meta")), t0 + ms(2500));
        assert_eq!(monitor.next_deadline(), Some(t0 + ms(4500)));
        assert_eq!(monitor.tick(t0 + ms(4000)), ThreatState::Suspected);
        assert_eq!(monitor.tick(t0 + ms(4500)), ThreatState::Clear);
    }

    #[test]
    fn test_visibility_alert_threshold() {
        let (mut monitor, audit) = monitor();
        let mut now = Instant::now();
        for _ in 0..5 {
            monitor.visibility_changed(false, now);
            now += ms(10);
            monitor.visibility_changed(true, now);
            now += ms(10);
        }
        assert_eq!(audit.count_of(SecurityEventType::VisibilityHidden), 5);
        assert_eq!(audit.count_of(SecurityEventType::SuspiciousActivity), 2);
    }

    #[test]
    fn test_probe_detection_is_terminal() {
        let (mut monitor, audit) = monitor();
        let t0 = Instant::now();
        let report = ProbeReport {
            detected: true,
            processes: vec!["camtasia".into()],
        };

        assert_eq!(monitor.probe_report(&report), ThreatState::Confirmed);
        assert_eq!(monitor.probe_report(&report), ThreatState::Confirmed);
        monitor.focus_lost(t0);
        monitor.focus_returned(t0);
        assert_eq!(monitor.tick(t0 + ms(60_000)), ThreatState::Confirmed);

        assert_eq!(audit.count_of(SecurityEventType::RecordingSoftwareDetected), 1);
        assert_eq!(monitor.detection().unwrap().processes, vec!["camtasia".to_string()]);
    }

    #[test]
    fn test_negative_report_does_not_clear() {
        let (mut monitor, _) = monitor();
        let t0 = Instant::now();
        monitor.focus_lost(t0);
        assert_eq!(monitor.probe_report(&ProbeReport::default()), ThreatState::Suspected);
    }

    #[test]
    fn test_probe_failure_fails_closed() {
        let (mut monitor, audit) = monitor();
        let t0 = Instant::now();
        assert_eq!(monitor.probe_failed("timed out", t0), ThreatState::Suspected);
        assert_eq!(monitor.next_deadline(), Some(t0 + ms(1000)));
        assert_eq!(audit.count_of(SecurityEventType::ProbeFailed), 1);
    }
}
