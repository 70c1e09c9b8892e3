//! Session window policy
//!
//! Fixed restriction sets applied to a surface at creation time, before first
//! paint. Application is one-time; nothing here toggles at runtime.

use bitflags::bitflags;
use reqwest::Url;
use tracing::{debug, warn};

use crate::audit::{AuditLog, EventOrigin, SecurityEventType};
use crate::surface::{DisplaySurface, SurfaceRole};

bitflags! {
    /// Capabilities disabled on a surface
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct Restrictions: u32 {
        const REMOTE_CODE_BRIDGE    = 1 << 0;
        const UNSANDBOXED_SCRIPTING = 1 << 1;
        const INSECURE_CONTENT      = 1 << 2;
        const NEW_WINDOWS           = 1 << 3;
        const DRAG_DROP             = 1 << 4;
        const CONTEXT_MENU          = 1 << 5;
        const EXTERNAL_NAVIGATION   = 1 << 6;
        const INSPECTOR             = 1 << 7;
        const PRINTING              = 1 << 8;
        const SAVE                  = 1 << 9;
        const CLIPBOARD_WRITE       = 1 << 10;
    }
}

impl Restrictions {
    /// Restrictions every surface carries
    pub const BASELINE: Restrictions = Restrictions::REMOTE_CODE_BRIDGE
        .union(Restrictions::UNSANDBOXED_SCRIPTING)
        .union(Restrictions::INSECURE_CONTENT)
        .union(Restrictions::NEW_WINDOWS)
        .union(Restrictions::DRAG_DROP)
        .union(Restrictions::CONTEXT_MENU)
        .union(Restrictions::EXTERNAL_NAVIGATION);

    /// Additional restrictions for document viewers
    pub const VIEWER_ONLY: Restrictions = Restrictions::INSPECTOR
        .union(Restrictions::PRINTING)
        .union(Restrictions::SAVE)
        .union(Restrictions::CLIPBOARD_WRITE);

    /// Flag names, for logs and audit messages
    pub fn names(&self) -> Vec<&'static str> {
        self.iter_names().map(|(name, _)| name).collect()
    }
}

/// Restriction set for one surface role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowPolicy {
    pub role: SurfaceRole,
    pub disabled: Restrictions,
    pub capture_resistance: bool,
    pub hide_menu: bool,
}

/// What the host could not honor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyReport {
    pub unhonored: Restrictions,
    pub capture_resistance_unsupported: bool,
}

impl PolicyReport {
    pub fn honored() -> Self {
        Self {
            unhonored: Restrictions::empty(),
            capture_resistance_unsupported: false,
        }
    }

    pub fn is_degraded(&self) -> bool {
        !self.unhonored.is_empty() || self.capture_resistance_unsupported
    }

    /// Human-readable list of gaps
    pub fn describe(&self) -> String {
        let mut gaps: Vec<&str> = self.unhonored.names();
        if self.capture_resistance_unsupported {
            gaps.push("CAPTURE_RESISTANCE");
        }
        gaps.join(", ")
    }
}

impl WindowPolicy {
    pub fn for_role(role: SurfaceRole) -> Self {
        let disabled = match role {
            SurfaceRole::Primary => Restrictions::BASELINE,
            SurfaceRole::Viewer => Restrictions::BASELINE | Restrictions::VIEWER_ONLY,
        };
        Self {
            role,
            disabled,
            capture_resistance: true,
            hide_menu: true,
        }
    }

    pub fn disables(&self, restriction: Restrictions) -> bool {
        self.disabled.contains(restriction)
    }

    /// Only local (`file:`) resources may be loaded into a surface
    pub fn permits_navigation(&self, url: &str) -> bool {
        if !self.disables(Restrictions::EXTERNAL_NAVIGATION) {
            return true;
        }
        match Url::parse(url) {
            Ok(parsed) => parsed.scheme() == "file",
            Err(_) => false,
        }
    }

    /// Applies the policy to a freshly created surface.
    ///
    /// Never fails: gaps the host reports are recorded as `POLICY_DEGRADED` and
    /// the surface stays usable.
    pub fn apply(
        &self,
        surface: &dyn DisplaySurface,
        audit: &AuditLog,
        origin: &EventOrigin,
    ) -> PolicyReport {
        let mut report = surface.apply_policy(self);
        // only gaps in what was requested count
        report.unhonored &= self.disabled;
        if !self.capture_resistance {
            report.capture_resistance_unsupported = false;
        }

        if report.is_degraded() {
            let gaps = report.describe();
            warn!("⚠️ {} surface opened with degraded policy: {}", self.role, gaps);
            audit.record(
                SecurityEventType::PolicyDegraded,
                format!("{} surface could not honor: {}", self.role, gaps),
                origin,
            );
        } else {
            debug!("Applied {} policy: {:?}", self.role, self.disabled.names());
        }

        report
    }
}
