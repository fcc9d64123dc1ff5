mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use futures::StreamExt;

use huddle::error::Error;
use huddle::media::CaptureConstraints;
use huddle::session::{ControlState, Huddle, SessionEventKind, SessionStatus, StartOutcome};
use huddle::signaling::SignalEvent;

#[tokio::test]
async fn start_call_joins_room_and_reports_waiting() -> anyhow::Result<()> {
    let mut h = common::setup();
    let mut events = h.coordinator.get_event_stream().await?;

    let outcome = h
        .coordinator
        .start_call("ABC123", "Alice", CaptureConstraints::default())
        .await?;
    assert_eq!(outcome, StartOutcome::Joined);
    assert_eq!(
        h.signaling.joined.lock().as_slice(),
        &[("ABC123".to_string(), "Alice".to_string())]
    );
    assert_eq!(h.signaling.local_streams.lock().len(), 1);
    assert_eq!(
        h.coordinator.session_status().await?,
        SessionStatus::InCall
    );

    // Idle -> Connecting -> InCall -> waiting message
    let waiting = common::timeout(Duration::from_secs(5), async {
        loop {
            match events.next().await {
                Some(SessionEventKind::StatusMessage { message }) => break message,
                Some(_) => {}
                None => panic!("event stream closed"),
            }
        }
    })
    .await?;
    assert_eq!(waiting, "Waiting for others to join...");
    Ok(())
}

#[tokio::test]
async fn external_meeting_url_bypasses_session() -> anyhow::Result<()> {
    let mut h = common::setup();
    let outcome = h
        .coordinator
        .start_call(
            "https://meet.google.com/xyz-abcd-efg",
            "Bob",
            CaptureConstraints::default(),
        )
        .await?;
    assert_eq!(
        outcome,
        StartOutcome::ExternalRedirect {
            url: "https://meet.google.com/xyz-abcd-efg".to_string()
        }
    );
    assert_eq!(
        h.launcher.opened.lock().as_slice(),
        &["https://meet.google.com/xyz-abcd-efg".to_string()]
    );
    // no room joined, no media acquired, state machine stays idle
    assert!(h.signaling.joined.lock().is_empty());
    assert!(h.media.captured.lock().is_empty());
    assert_eq!(h.coordinator.session_status().await?, SessionStatus::Idle);
    Ok(())
}

#[tokio::test]
async fn bare_meeting_link_is_normalized() -> anyhow::Result<()> {
    let mut h = common::setup();
    h.coordinator
        .start_call("meet.google.com/abc-defg-hij", "Bob", Default::default())
        .await?;
    assert_eq!(
        h.launcher.opened.lock().as_slice(),
        &["https://meet.google.com/abc-defg-hij".to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn media_failure_rolls_back_to_idle() -> anyhow::Result<()> {
    let mut h = common::setup();
    *h.media.capture_error.lock() = Some(Error::MediaPermissionDenied);

    let result = h
        .coordinator
        .start_call("ABC123", "Alice", Default::default())
        .await;
    assert!(matches!(result, Err(Error::MediaPermissionDenied)));
    assert_eq!(h.coordinator.session_status().await?, SessionStatus::Idle);
    assert!(h.signaling.joined.lock().is_empty());
    assert!(h.signaling.local_streams.lock().is_empty());
    assert!(h.coordinator.participants().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn join_failure_stops_acquired_stream() -> anyhow::Result<()> {
    let mut h = common::setup();
    *h.signaling.join_error.lock() = Some(Error::FailedToSendSignal("offline".into()));

    let result = h
        .coordinator
        .start_call("ABC123", "Alice", Default::default())
        .await;
    assert!(result.is_err());
    assert_eq!(h.coordinator.session_status().await?, SessionStatus::Idle);
    let stream = h.media.last_capture();
    assert!(stream.tracks().iter().all(|t| t.is_stopped()));
    Ok(())
}

#[tokio::test]
async fn second_start_call_is_rejected() -> anyhow::Result<()> {
    let mut h = common::setup();
    h.coordinator
        .start_call("ABC123", "Alice", Default::default())
        .await?;
    let result = h
        .coordinator
        .start_call("DEF456", "Alice", Default::default())
        .await;
    assert!(matches!(result, Err(Error::CallAlreadyInProgress)));
    Ok(())
}

#[tokio::test]
async fn end_call_tears_everything_down() -> anyhow::Result<()> {
    let mut h = common::setup();
    h.coordinator
        .start_call("ABC123", "Alice", Default::default())
        .await?;
    h.signal_tx.send(SignalEvent::UserJoined {
        sid: "s1".into(),
        username: "Bob".into(),
    })?;
    common::timeout(Duration::from_secs(5), async {
        while h.coordinator.participants().await.unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    h.coordinator.end_call().await?;

    assert!(h.coordinator.participants().await?.is_empty());
    assert_eq!(h.coordinator.control_state().await?, ControlState::Idle);
    assert!(h.coordinator.chat_history().await?.is_empty());
    assert_eq!(h.signaling.leaves.load(Ordering::SeqCst), 1);
    assert_eq!(h.coordinator.session_status().await?, SessionStatus::Ended);
    for stream in h.media.captured.lock().iter() {
        assert!(stream.tracks().iter().all(|t| t.is_stopped()));
    }
    Ok(())
}

#[tokio::test]
async fn end_call_is_idempotent() -> anyhow::Result<()> {
    let mut h = common::setup();
    // safe with no session at all
    h.coordinator.end_call().await?;
    assert_eq!(h.signaling.leaves.load(Ordering::SeqCst), 0);

    h.coordinator
        .start_call("ABC123", "Alice", Default::default())
        .await?;
    h.coordinator.end_call().await?;
    h.coordinator.end_call().await?;
    assert_eq!(h.signaling.leaves.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn late_events_after_teardown_are_ignored() -> anyhow::Result<()> {
    let mut h = common::setup();
    h.coordinator
        .start_call("ABC123", "Alice", Default::default())
        .await?;
    h.coordinator.end_call().await?;

    h.signal_tx.send(SignalEvent::UserJoined {
        sid: "s1".into(),
        username: "Ghost".into(),
    })?;
    h.signal_tx.send(SignalEvent::GrantControl)?;
    // give the loop a chance to (mis)handle them
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.coordinator.participants().await?.is_empty());
    assert_eq!(h.coordinator.control_state().await?, ControlState::Idle);
    Ok(())
}

#[tokio::test]
async fn call_can_be_restarted_after_ending() -> anyhow::Result<()> {
    let mut h = common::setup();
    h.coordinator
        .start_call("ABC123", "Alice", Default::default())
        .await?;
    h.coordinator.end_call().await?;
    let outcome = h
        .coordinator
        .start_call("XYZ789", "Alice", Default::default())
        .await?;
    assert_eq!(outcome, StartOutcome::Joined);
    assert_eq!(h.coordinator.session_status().await?, SessionStatus::InCall);
    assert_eq!(h.signaling.joined.lock().len(), 2);
    Ok(())
}
