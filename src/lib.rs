//! Protected viewing sessions for sensitive PDF documents
//!
//! Authenticated retrieval, a single-viewer document channel, a render
//! pipeline, threat monitoring that hides content on suspected capture, and an
//! identity watermark bound to each viewing session.

// Configuration and errors
pub mod config;
pub mod error;

// Session and backend access
pub mod fetch;
pub mod services;
pub mod session;

// Security events
pub mod audit;

// Surfaces and their policy
pub mod policy;
pub mod surface;

// Rendering
pub mod render;

// Threat monitoring and watermarking
pub mod threat;
pub mod watermark;

// Viewer lifecycle
pub mod channel;
pub mod context;
pub mod viewer;

// Re-exports for crate consumers
pub use audit::{AuditLog, EventOrigin, SecurityEvent, SecurityEventType};
pub use channel::{DocumentChannel, DocumentHandle, OpenOutcome};
pub use config::Config;
pub use context::AppContext;
pub use error::{Error, RenderError, Result, ServiceError};
pub use fetch::AuthenticatedFetch;
pub use policy::{PolicyReport, Restrictions, WindowPolicy};
pub use render::{LopdfRenderer, RenderPipeline, Rotation, ViewState};
pub use services::{AuthService, DocumentService, HttpApi, LoginGrant};
pub use session::{JsonFileStore, KeyValueStore, MemoryStore, Session, SessionStore};
pub use surface::{DisplaySurface, KeyEvent, Notice, SurfaceEvent, SurfaceHandle, SurfaceHost, SurfaceRole};
pub use threat::{CaptureProbe, ProbeReport, ProcessScanProbe, ThreatMonitor, ThreatState};
pub use viewer::{CloseReason, ViewerCommand, ViewerDeps, ViewerHandle, ViewerStatus};
pub use watermark::{WatermarkBinder, WatermarkSpec};
