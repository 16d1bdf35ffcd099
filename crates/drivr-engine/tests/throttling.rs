mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{ADMIN_SECRET, DRIVER_SECRET, fixture, test_config};
use drivr_core::ManualClock;
use drivr_engine::config::ThrottleConfig;
use drivr_engine::{AdmissionRequest, EngineError, LoadMonitor, ThrottleMode};
use time::macros::datetime;

#[tokio::test]
async fn throttled_requests_fail_fast_with_backoff() {
    let mut config = test_config();
    config.throttle.high_sessions = 2;
    config.throttle.low_sessions = 1;
    config.throttle.per_identity_concurrency = 1;
    config.throttle.retry_after = Duration::from_secs(3);
    let fx = fixture(config);

    let driver = fx.engine.login("driver7", DRIVER_SECRET).await.unwrap();
    let _admin = fx.engine.login("admin", ADMIN_SECRET).await.unwrap();

    // Hold one call for driver7 open.
    let (release, gate) = tokio::sync::oneshot::channel::<()>();
    let holder = {
        let engine = fx.engine.clone();
        let token = driver.token.clone();
        tokio::spawn(async move {
            engine
                .authenticated_call(&token, |session| async move {
                    let _ = gate.await;
                    Ok(session.identity)
                })
                .await
        })
    };
    while fx.engine.stats().await.unwrap().load.in_flight == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let err = fx
        .engine
        .authenticated_call(&driver.token, |_| async { Ok(()) })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Throttled { .. }));
    assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
    assert_eq!(fx.engine.stats().await.unwrap().load.mode, ThrottleMode::Throttled);

    let _ = release.send(());
    assert_eq!(holder.await.unwrap().unwrap(), "driver7");

    // The permit was released with the call.
    fx.engine
        .authenticated_call(&driver.token, |_| async { Ok(()) })
        .await
        .unwrap();
}

#[tokio::test]
async fn normal_mode_has_no_concurrency_caps() {
    let mut config = test_config();
    config.throttle.per_identity_concurrency = 1;
    let fx = fixture(config);
    let driver = fx.engine.login("driver7", DRIVER_SECRET).await.unwrap();

    let nested = fx
        .engine
        .authenticated_call(&driver.token, |_| {
            let engine = fx.engine.clone();
            let token = driver.token.clone();
            async move {
                engine
                    .authenticated_call(&token, |session| async move { Ok(session.identity) })
                    .await
            }
        })
        .await
        .unwrap();
    assert_eq!(nested, "driver7");
}

#[test]
fn hysteresis_under_a_synthetic_trace() {
    let clock = Arc::new(ManualClock::new(datetime!(2025-06-01 09:00 UTC)));
    let monitor = LoadMonitor::new(
        ThrottleConfig {
            high_sessions: 10,
            low_sessions: 5,
            burst_requests: 1_000,
            low_requests: 500,
            cooldown: Duration::from_secs(60),
            ..ThrottleConfig::default()
        },
        clock.clone(),
    );
    let request = AdmissionRequest::new("client", None);

    let observe = |sessions: usize, advance_secs: i64| {
        clock.advance(time::Duration::seconds(advance_secs));
        drop(monitor.admit(&request, sessions).unwrap());
        monitor.mode()
    };

    assert_eq!(observe(9, 0), ThrottleMode::Normal);
    assert_eq!(observe(10, 1), ThrottleMode::Throttled);
    assert_eq!(observe(7, 1), ThrottleMode::Throttled);
    assert_eq!(observe(4, 1), ThrottleMode::Throttled);
    assert_eq!(observe(4, 30), ThrottleMode::Throttled);
    assert_eq!(observe(6, 1), ThrottleMode::Throttled);
    assert_eq!(observe(4, 1), ThrottleMode::Throttled);
    assert_eq!(observe(4, 59), ThrottleMode::Throttled);
    assert_eq!(observe(4, 1), ThrottleMode::Normal);
    assert_eq!(observe(9, 1), ThrottleMode::Normal);
}

#[tokio::test]
async fn expired_session_is_reported_and_destroyed() {
    let fx = fixture(test_config());
    let driver = fx.engine.login("driver7", DRIVER_SECRET).await.unwrap();

    fx.clock.advance(time::Duration::hours(2));
    let err = fx
        .engine
        .authenticated_call(&driver.token, |_| async { Ok(()) })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Expired));

    let err = fx
        .engine
        .authenticated_call(&driver.token, |_| async { Ok(()) })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AuthFailure { .. }));
}

#[tokio::test]
async fn logout_ends_the_session() {
    let fx = fixture(test_config());
    let driver = fx.engine.login("driver7", DRIVER_SECRET).await.unwrap();
    fx.engine.logout(&driver.token).await.unwrap();
    fx.engine.logout(&driver.token).await.unwrap();
    assert!(
        fx.engine
            .authenticated_call(&driver.token, |_| async { Ok(()) })
            .await
            .is_err()
    );
}
