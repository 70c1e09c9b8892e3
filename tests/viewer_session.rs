mod fixtures;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use fixtures::{viewer_deps, FakeSurface, StaticProbe};
use pdfshield::viewer::ViewerSession;
use pdfshield::{
    CaptureProbe, CloseReason, DocumentHandle, KeyEvent, Notice, ProbeReport, SecurityEventType,
    SurfaceEvent, SurfaceRole, ThreatState, ViewerDeps, ViewerHandle,
};

async fn launch(deps: ViewerDeps) -> (ViewerHandle, Arc<FakeSurface>, mpsc::Sender<SurfaceEvent>) {
    let surface = Arc::new(FakeSurface::new(SurfaceRole::Viewer));
    let (tx, rx) = mpsc::channel(64);
    let (handle, loaded) = ViewerSession::launch(
        deps,
        "alice".to_string(),
        surface.clone(),
        rx,
        Vec::new(),
        DocumentHandle::new("a.pdf", b"%PDF-1.7 a".to_vec()),
    )
    .await;
    loaded.unwrap();
    (handle, surface, tx)
}

async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn test_focus_return_within_grace_restores_without_rerender() {
    let (handle, surface, tx) = launch(viewer_deps(3, None)).await;
    settle(1).await;
    assert!(handle.status().visible);
    assert_eq!(surface.frames(), 1);

    tx.send(SurfaceEvent::Blur).await.unwrap();
    settle(10).await;
    assert!(!handle.status().visible);
    assert_eq!(handle.threat_state(), ThreatState::Suspected);

    tx.send(SurfaceEvent::Focus).await.unwrap();
    settle(300).await;
    assert!(!handle.status().visible, "grace window still running");

    settle(300).await;
    assert!(handle.status().visible);
    assert_eq!(handle.threat_state(), ThreatState::Clear);
    assert_eq!(surface.frames(), 1);
    assert_eq!(surface.visibility_changes(), vec![false, true, false, true]);
}

#[tokio::test(start_paused = true)]
async fn test_content_stays_hidden_until_every_condition_clears() {
    let deps = viewer_deps(3, None);
    let audit = deps.audit.clone();
    let (handle, _surface, tx) = launch(deps).await;

    tx.send(SurfaceEvent::Blur).await.unwrap();
    tx.send(SurfaceEvent::VisibilityChanged { visible: false }).await.unwrap();
    settle(10).await;
    tx.send(SurfaceEvent::Focus).await.unwrap();
    settle(2_000).await;
    assert!(!handle.status().visible, "surface is still hidden");
    assert_eq!(handle.threat_state(), ThreatState::Suspected);

    tx.send(SurfaceEvent::VisibilityChanged { visible: true }).await.unwrap();
    settle(600).await;
    assert!(handle.status().visible);

    assert_eq!(audit.count_of(SecurityEventType::WindowBlur), 1);
    assert_eq!(audit.count_of(SecurityEventType::VisibilityHidden), 1);
}

#[tokio::test(start_paused = true)]
async fn test_print_screen_hides_for_capture_grace() {
    let deps = viewer_deps(3, None);
    let audit = deps.audit.clone();
    let (handle, _surface, tx) = launch(deps).await;

    tx.send(SurfaceEvent::Key(KeyEvent::down("PrintScreen"))).await.unwrap();
    settle(900).await;
    assert!(!handle.status().visible);

    settle(200).await;
    assert!(handle.status().visible);
    assert_eq!(audit.count_of(SecurityEventType::ScreenshotKey), 1);
}

#[tokio::test(start_paused = true)]
async fn test_blocked_shortcut_is_logged_but_does_not_hide() {
    let deps = viewer_deps(3, None);
    let audit = deps.audit.clone();
    let (handle, _surface, tx) = launch(deps).await;

    tx.send(SurfaceEvent::Key(KeyEvent::down("p").with_ctrl())).await.unwrap();
    tx.send(SurfaceEvent::NavigationRequested {
        url: "https://elsewhere.example".into(),
    })
    .await
    .unwrap();
    settle(10).await;

    assert!(handle.status().visible);
    assert_eq!(audit.count_of(SecurityEventType::PrintAttempt), 1);
    assert_eq!(audit.count_of(SecurityEventType::NavigationBlocked), 1);
}

#[tokio::test(start_paused = true)]
async fn test_navigation_keys_drive_the_pipeline() {
    let (handle, surface, tx) = launch(viewer_deps(3, None)).await;

    tx.send(SurfaceEvent::Key(KeyEvent::down("ArrowRight"))).await.unwrap();
    settle(10).await;
    assert_eq!(handle.view().unwrap().page, 2);

    tx.send(SurfaceEvent::Key(KeyEvent::down("End"))).await.unwrap();
    settle(10).await;
    assert_eq!(handle.view().unwrap().page, 3);
    assert_eq!(surface.frames(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_watermark_refreshes_every_second() {
    let (_handle, surface, _tx) = launch(viewer_deps(1, None)).await;
    settle(3_050).await;
    assert!(surface.overlays() >= 4, "got {}", surface.overlays());
}

#[tokio::test(start_paused = true)]
async fn test_capture_software_detection_confirms_and_force_closes() {
    let probe = Arc::new(StaticProbe::clean());
    let deps = viewer_deps(3, Some(probe.clone() as Arc<dyn CaptureProbe>));
    let audit = deps.audit.clone();
    let (handle, surface, tx) = launch(deps).await;

    settle(2_500).await;
    assert!(handle.status().visible);

    probe.set(ProbeReport::matched(vec!["camtasia".to_string()]));
    settle(2_000).await;
    assert_eq!(handle.threat_state(), ThreatState::Confirmed);
    assert!(!handle.status().visible);
    assert!(matches!(
        surface.notices().last(),
        Some(Notice::ThreatBlocked { processes, identity, .. })
            if processes == &vec!["camtasia".to_string()] && identity == "alice"
    ));

    // Confirmation is terminal
    tx.send(SurfaceEvent::Focus).await.unwrap();
    settle(10).await;
    assert!(!handle.status().visible);

    assert_eq!(handle.closed().await, Some(CloseReason::ThreatConfirmed));
    assert!(surface.is_closed());
    assert_eq!(audit.count_of(SecurityEventType::RecordingSoftwareDetected), 1);
}

#[tokio::test(start_paused = true)]
async fn test_surface_close_and_requested_close() {
    let (handle, surface, tx) = launch(viewer_deps(1, None)).await;
    tx.send(SurfaceEvent::CloseRequested).await.unwrap();
    assert_eq!(handle.closed().await, Some(CloseReason::SurfaceClosed));
    assert!(surface.is_closed());
    assert!(handle.is_closed());

    let (handle, surface, _tx) = launch(viewer_deps(1, None)).await;
    handle.close().await;
    assert_eq!(handle.status().closed, Some(CloseReason::Requested));
    assert!(surface.is_closed());
    assert!(handle.next_page().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_backlog_reaches_monitor_before_first_frame() {
    let deps = viewer_deps(2, None);
    let surface = Arc::new(FakeSurface::new(SurfaceRole::Viewer));
    let (_tx, rx) = mpsc::channel(8);
    let (handle, loaded) = ViewerSession::launch(
        deps,
        "alice".to_string(),
        surface.clone(),
        rx,
        vec![SurfaceEvent::Blur],
        DocumentHandle::new("a.pdf", b"%PDF-1.7 a".to_vec()),
    )
    .await;

    assert_eq!(loaded.unwrap().page, 1);
    assert_eq!(surface.frames(), 1);
    assert!(!handle.status().visible);
    assert_eq!(surface.visibility_changes(), vec![false]);
}

#[tokio::test(start_paused = true)]
async fn test_ctrl_wheel_zooms_and_plain_wheel_scrolls() {
    let (handle, _surface, tx) = launch(viewer_deps(3, None)).await;

    tx.send(SurfaceEvent::Wheel { delta_y: -120.0, ctrl: true, meta: false })
        .await
        .unwrap();
    settle(10).await;
    let zoom = handle.view().unwrap().zoom;
    assert!((zoom - 1.1).abs() < 1e-9, "zoom {}", zoom);

    tx.send(SurfaceEvent::Wheel { delta_y: 120.0, ctrl: false, meta: false })
        .await
        .unwrap();
    settle(10).await;
    assert!((handle.view().unwrap().zoom - 1.1).abs() < 1e-9);

    tx.send(SurfaceEvent::Wheel { delta_y: 120.0, ctrl: false, meta: true })
        .await
        .unwrap();
    settle(10).await;
    assert!((handle.view().unwrap().zoom - 1.0).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_focus_after_close_is_dropped() {
    let (handle, surface, _tx) = launch(viewer_deps(1, None)).await;
    handle.focus();
    settle(10).await;
    assert_eq!(surface.focus_count(), 1);

    handle.close().await;
    handle.focus();
    settle(10).await;
    assert_eq!(surface.focus_count(), 1);
}
