//! Threat monitoring: key classification, the threat state machine and
//! capture-software probes

pub mod keys;
pub mod monitor;
pub mod probe;

pub use keys::{classify, CapturePrecursor, KeyAction, NavigationKey, Severity};
pub use monitor::{Detection, ThreatMonitor, ThreatState};
pub use probe::{CaptureProbe, ProbeReport, ProcFs, ProcessScanProbe, ProcessSource};
