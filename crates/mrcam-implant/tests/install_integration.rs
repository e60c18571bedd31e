//! Integration tests for the injected module's application layer.
//!
//! The service's view and the module's view of the camera segment are two
//! separate mappings of one file, as they would be across processes.  The
//! interposer and unloader are the recording doubles from
//! `infrastructure::mock`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mrcam_core::protocol::{CAMERA_BYTES, CAMERA_SEGMENT_NAME, MIN_FRAME_BYTES};
use mrcam_core::{
    AutoResetEvent, BufferRef, CameraLayout, FrameSignal, InstallStage, SharedSegment, UnloadState,
};
use mrcam_implant::application::install::{Hook, HookInstaller};
use mrcam_implant::application::intercept::{CompletionInterceptor, CompletionOutcome};
use mrcam_implant::application::unload::UnloadWatcher;
use mrcam_implant::infrastructure::mock::{
    FailPoint, MockInterposerLog, RecordingInterposer, RecordingUnloader,
};

// ── Helpers ───────────────────────────────────────────────────────────────────

fn temp_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("mrcam_implant_{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

/// `(service view, module view)` of one camera segment.
fn camera_pair() -> (SharedSegment<CameraLayout>, Arc<SharedSegment<CameraLayout>>) {
    let dir = temp_dir();
    let service = SharedSegment::create_in(&dir, CAMERA_SEGMENT_NAME).expect("create");
    let module = SharedSegment::open_in(&dir, CAMERA_SEGMENT_NAME).expect("open");
    (service, Arc::new(module))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[test]
fn test_service_observes_each_frozen_install_stage() {
    let cases = [
        (FailPoint::Find, 1),
        (FailPoint::Begin, 2),
        (FailPoint::Attach(Hook::Completion), 4),
        (FailPoint::Attach(Hook::Submit), 5),
        (FailPoint::Commit, 6),
    ];

    for (fail_at, raw_stage) in cases {
        // Arrange
        let (service, module) = camera_pair();
        let mut installer = HookInstaller::new(RecordingInterposer::failing_at(fail_at));

        // Act
        let result = installer.install(&*module);

        // Assert
        assert!(result.is_err());
        assert_eq!(service.install_stage_raw(), raw_stage, "{fail_at:?}");
        assert!(!service.installed());
    }
}

#[test]
fn test_thread_enlistment_failure_still_reports_installed() {
    let (service, module) = camera_pair();
    let mut installer =
        HookInstaller::new(RecordingInterposer::failing_at(FailPoint::UpdateThreads));

    installer.install(&*module).expect("install succeeds without threads");

    assert_eq!(service.install_stage(), Some(InstallStage::Installed));
    assert!(service.installed());
}

#[test]
fn test_frames_flow_from_completion_to_service_view() {
    // Arrange
    let (service, module) = camera_pair();
    let signal = Arc::new(AutoResetEvent::new());
    let interceptor = CompletionInterceptor::new(module.clone(), signal.clone());
    let first = vec![0xA1u8; MIN_FRAME_BYTES];
    let second = vec![0xB2u8; MIN_FRAME_BYTES + 64];
    interceptor.on_submit(0x10, BufferRef { addr: first.as_ptr() as usize, len: first.len() });
    interceptor.on_submit(0x20, BufferRef { addr: second.as_ptr() as usize, len: second.len() });

    // Act – completions arrive out of submission order
    // SAFETY: both buffers outlive the calls.
    let second_outcome = unsafe { interceptor.on_complete(0x20, second.len()) };
    let first_outcome = unsafe { interceptor.on_complete(0x10, first.len()) };

    // Assert
    assert!(matches!(second_outcome, CompletionOutcome::Published { counter: 1, .. }));
    assert!(matches!(first_outcome, CompletionOutcome::Published { counter: 2, .. }));
    assert!(signal.wait(Duration::from_millis(10)));
    let mut out = vec![0u8; CAMERA_BYTES];
    let meta = service.consume_frame(&mut out).expect("consistent frame");
    assert_eq!(meta.counter, 2);
    assert_eq!(meta.bytes, MIN_FRAME_BYTES);
    assert!(out[..meta.bytes].iter().all(|&b| b == 0xA1));
}

#[test]
fn test_service_removal_request_unloads_module_after_detach() {
    // Arrange
    let (service, module) = camera_pair();
    let interposer = RecordingInterposer::new();
    let log = interposer.log_handle();
    let mut installer = HookInstaller::new(interposer);
    installer.install(&*module).expect("install");
    let unloader = RecordingUnloader::new();
    let mut watcher = UnloadWatcher::new(installer, module.clone(), unloader.clone())
        .with_poll_interval(Duration::from_millis(1));

    // Act
    service.set_remove_requested(true);
    let final_state = watcher.run();

    // Assert
    assert_eq!(final_state, UnloadState::Unloading);
    assert_eq!(unloader.calls(), 1);
    assert_eq!(service.install_stage(), Some(InstallStage::Removed));
    assert!(service.remove_succeeded());
    assert!(!service.remove_failed());
    let log = log.lock().expect("log").clone();
    assert_eq!(
        &log[log.len() - 4..],
        &[
            MockInterposerLog::Begin,
            MockInterposerLog::Detach(Hook::Completion),
            MockInterposerLog::Detach(Hook::Submit),
            MockInterposerLog::Commit,
        ]
    );
}

#[test]
fn test_failed_detach_is_reported_and_module_stays_loaded() {
    // Arrange
    let (service, module) = camera_pair();
    let mut installer =
        HookInstaller::new(RecordingInterposer::failing_at(FailPoint::Detach(Hook::Submit)));
    installer.install(&*module).expect("install");
    let unloader = RecordingUnloader::new();
    let mut watcher = UnloadWatcher::new(installer, module.clone(), unloader.clone())
        .with_poll_interval(Duration::from_millis(1));

    // Act
    service.set_remove_requested(true);
    watcher.run();

    // Assert
    assert_eq!(service.install_stage(), Some(InstallStage::DetachSubmit));
    assert!(service.remove_failed());
    assert!(!service.remove_succeeded());
    assert_eq!(unloader.calls(), 0);
}
