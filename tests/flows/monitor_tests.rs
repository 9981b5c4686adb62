//! Session monitor state machine flows.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use uuid::Uuid;

use session_core::application::monitor::SessionState;
use session_core::application::refresh::RefreshFailure;
use session_core::infrastructure::storage::{MemorySharedStore, SharedStore};

use crate::common::{forge_token, harness, harness_with, settle, QuietStore};

/// A credential just past the warning threshold refreshes so promptly that
/// the warning toast never appears.
#[tokio::test(start_paused = true)]
async fn prompt_refresh_keeps_the_warning_invisible() {
    let h = harness().await;
    h.runtime.handle().session_started(forge_token(301));
    settle().await;
    assert_eq!(h.runtime.handle().state(), SessionState::Active);

    // Timer fires one second in; the refresh succeeds immediately.
    tokio::time::advance(Duration::from_secs(2)).await;
    settle().await;

    assert_eq!(h.refresh.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.alerts.warnings.load(Ordering::SeqCst), 0);
    assert_eq!(h.runtime.handle().state(), SessionState::Active);
    assert!(h.runtime.scheduler.has_live_timer());

    h.runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn transient_failure_warns_once_and_recovery_dismisses() {
    let h = harness().await;
    h.refresh
        .push(Err(RefreshFailure::Network("connection refused".into())));
    h.runtime.handle().session_started(forge_token(301));
    settle().await;

    tokio::time::advance(Duration::from_secs(2)).await;
    settle().await;
    assert_eq!(h.runtime.handle().state(), SessionState::Warning);
    assert_eq!(h.alerts.warnings.load(Ordering::SeqCst), 1);

    // Manual retry inside the cool-down hits the cached failure; the toast
    // is not shown a second time for the same credential.
    h.runtime.handle().refresh_now();
    settle().await;
    assert_eq!(h.refresh.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.alerts.warnings.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(11)).await;
    h.runtime.handle().refresh_now();
    settle().await;

    assert_eq!(h.refresh.calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.alerts.dismissals.load(Ordering::SeqCst), 1);
    assert_eq!(h.runtime.handle().state(), SessionState::Active);

    h.runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn rejected_refresh_runs_the_logout_sequence() {
    let h = harness().await;
    h.refresh
        .push(Err(RefreshFailure::Rejected("revoked".into())));
    // Already inside the warning threshold; refresh fires immediately.
    h.runtime.handle().session_started(forge_token(200));
    settle().await;

    assert_eq!(h.runtime.handle().state(), SessionState::Expired);
    assert_eq!(h.navigator.logins.load(Ordering::SeqCst), 1);
    assert_eq!(h.alerts.expired.load(Ordering::SeqCst), 1);
    assert!(h.shared.get("authToken").is_none());
    assert_eq!(
        h.runtime.tab_store.get("returnUrl").as_deref(),
        Some("/bookings/42")
    );

    h.runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn expired_credential_at_start_expires_without_a_refresh() {
    let h = harness().await;
    h.runtime.handle().session_started(forge_token(-5));
    settle().await;

    assert_eq!(h.runtime.handle().state(), SessionState::Expired);
    assert_eq!(h.refresh.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.navigator.logins.load(Ordering::SeqCst), 1);
    assert!(h.shared.get("authToken").is_none());
    assert!(h.session.claims.lock().is_none());

    h.runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn duplicate_expiry_triggers_are_suppressed() {
    let h = harness().await;
    h.runtime.handle().session_started(forge_token(-5));
    settle().await;
    assert_eq!(h.runtime.handle().state(), SessionState::Expired);

    h.runtime.handle().unauthorized();
    h.runtime.handle().logout();
    settle().await;

    assert_eq!(h.navigator.logins.load(Ordering::SeqCst), 1);
    assert_eq!(h.alerts.expired.load(Ordering::SeqCst), 1);

    h.runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn manual_logout_skips_the_expired_notice() {
    let h = harness().await;
    h.runtime.handle().session_started(forge_token(900));
    settle().await;

    h.runtime.handle().logout();
    settle().await;

    assert_eq!(h.runtime.handle().state(), SessionState::Expired);
    assert_eq!(h.navigator.logins.load(Ordering::SeqCst), 1);
    assert_eq!(h.alerts.expired.load(Ordering::SeqCst), 0);
    assert!(h.runtime.tab_store.get("returnUrl").is_none());
    assert!(h.shared.get("authToken").is_none());

    h.runtime.shutdown().await;
}

/// Logout in one runtime propagates through durable storage; the sibling
/// expires without attempting a refresh of its own.
#[tokio::test(start_paused = true)]
async fn logout_propagates_across_runtimes() {
    let shared = Arc::new(MemorySharedStore::new());
    let a = harness_with(shared.clone(), true).await;
    let b = harness_with(shared.clone(), true).await;

    let token = forge_token(900);
    a.runtime.handle().session_started(token.clone());
    settle().await;
    b.runtime.handle().session_started(token);
    settle().await;
    assert_eq!(a.runtime.handle().state(), SessionState::Active);
    assert_eq!(b.runtime.handle().state(), SessionState::Active);

    a.runtime.handle().logout();
    settle().await;

    assert_eq!(a.runtime.handle().state(), SessionState::Expired);
    assert_eq!(b.runtime.handle().state(), SessionState::Expired);
    assert_eq!(b.refresh.calls.load(Ordering::SeqCst), 0);
    assert_eq!(b.navigator.logins.load(Ordering::SeqCst), 1);
    assert_eq!(b.alerts.expired.load(Ordering::SeqCst), 1);
    // Manual origin suppresses the notice only where the logout started.
    assert_eq!(a.alerts.expired.load(Ordering::SeqCst), 0);
    assert!(shared.get("authToken").is_none());

    a.runtime.shutdown().await;
    b.runtime.shutdown().await;
}

/// A rotation written before this runtime has a session of its own is left
/// alone; adoption only applies mid-session.
#[tokio::test(start_paused = true)]
async fn rotation_while_inactive_is_not_adopted() {
    let h = harness().await;
    assert_eq!(h.runtime.handle().state(), SessionState::Inactive);

    h.shared
        .set(Uuid::new_v4(), "authToken", forge_token(900).as_str());
    settle().await;

    assert!(h.runtime.store.current().is_none());
    assert_eq!(h.runtime.handle().state(), SessionState::Inactive);
    assert!(!h.runtime.scheduler.has_live_timer());
    assert!(h.session.claims.lock().is_none());

    h.runtime.shutdown().await;
}

/// Focus regained re-reads durable storage; a logout this runtime never saw
/// the change event for still expires it, with no refresh attempt.
#[tokio::test(start_paused = true)]
async fn focus_reconciles_a_missed_remote_logout() {
    let quiet = Arc::new(QuietStore::new());
    let h = harness_with(quiet.clone(), true).await;
    h.runtime.handle().session_started(forge_token(900));
    settle().await;
    assert_eq!(h.runtime.handle().state(), SessionState::Active);

    // Another runtime logged out, but the change event never arrived.
    quiet.silent_remove("authToken");
    settle().await;
    assert_eq!(h.runtime.handle().state(), SessionState::Active);

    h.runtime.handle().focus_regained();
    settle().await;

    assert_eq!(h.runtime.handle().state(), SessionState::Expired);
    assert_eq!(h.refresh.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.navigator.logins.load(Ordering::SeqCst), 1);
    assert!(!h.runtime.scheduler.has_live_timer());

    h.runtime.shutdown().await;
}

/// Focus regained adopts a rotation whose change event was missed and re-arms
/// the timer against the fresher claims.
#[tokio::test(start_paused = true)]
async fn focus_adopts_a_missed_rotation() {
    let quiet = Arc::new(QuietStore::new());
    let h = harness_with(quiet.clone(), true).await;
    h.runtime.handle().session_started(forge_token(900));
    settle().await;
    let before = h.runtime.store.version();

    let rotated = forge_token(604_800);
    quiet.silent_set("authToken", rotated.as_str());
    h.runtime.handle().focus_regained();
    settle().await;

    let current = h.runtime.store.current().expect("credential present");
    assert_eq!(current.credential, rotated);
    assert!(current.version > before);
    assert_eq!(h.refresh.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.runtime.handle().state(), SessionState::Active);
    assert!(h.runtime.scheduler.has_live_timer());

    h.runtime.shutdown().await;
}

/// The coarse safety tick catches the same missed logout even when focus
/// never comes back.
#[tokio::test(start_paused = true)]
async fn safety_tick_reconciles_a_missed_remote_logout() {
    let quiet = Arc::new(QuietStore::new());
    let h = harness_with(quiet.clone(), true).await;
    h.runtime.handle().session_started(forge_token(900));
    settle().await;

    quiet.silent_remove("authToken");
    settle().await;
    assert_eq!(h.runtime.handle().state(), SessionState::Active);

    tokio::time::advance(Duration::from_secs(61)).await;
    settle().await;

    assert_eq!(h.runtime.handle().state(), SessionState::Expired);
    assert_eq!(h.refresh.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.navigator.logins.load(Ordering::SeqCst), 1);

    h.runtime.shutdown().await;
}

/// A credential rotated by another runtime is adopted in place of running a
/// second refresh.
#[tokio::test(start_paused = true)]
async fn rotation_by_another_runtime_is_adopted() {
    let h = harness().await;
    h.runtime.handle().session_started(forge_token(900));
    settle().await;
    let before = h.runtime.store.version();

    let rotated = forge_token(604_800);
    h.shared
        .set(Uuid::new_v4(), "authToken", rotated.as_str());
    settle().await;

    let current = h.runtime.store.current().expect("credential present");
    assert_eq!(current.credential, rotated);
    assert!(current.version > before);
    assert_eq!(h.refresh.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.runtime.handle().state(), SessionState::Active);
    assert!(h.runtime.scheduler.has_live_timer());

    h.runtime.shutdown().await;
}
