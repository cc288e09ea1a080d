//! Heartbeat Service Integration Tests

use pocketbot::heartbeat::{HEARTBEAT_FILE, HEARTBEAT_PROMPT};
use pocketbot::{HeartbeatOutcome, HeartbeatService};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

fn create_test_service(interval: Duration) -> (Arc<HeartbeatService>, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let service = Arc::new(HeartbeatService::new(temp_dir.path(), interval, true));
    (service, temp_dir)
}

fn write_tasks(dir: &TempDir, content: &str) {
    std::fs::write(dir.path().join(HEARTBEAT_FILE), content).expect("Failed to write heartbeat file");
}

async fn exploding_handler(_prompt: String) -> anyhow::Result<String> {
    panic!("provider exploded")
}

#[tokio::test]
async fn test_missing_or_empty_file_skips_agent() {
    let (service, temp) = create_test_service(Duration::from_secs(60));
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = calls.clone();
        service.set_on_heartbeat(move |_prompt| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("HEARTBEAT_OK".to_string())
            }
        });
    }

    assert_eq!(service.tick().await, HeartbeatOutcome::Skipped);

    write_tasks(&temp, "# Heartbeat\n\n<!-- tasks go here -->\n- [ ]\n");
    assert_eq!(service.tick().await, HeartbeatOutcome::Skipped);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_tick_outcomes() {
    let (service, temp) = create_test_service(Duration::from_secs(60));
    write_tasks(&temp, "# Heartbeat\n- [ ] water the plants\n");

    // Nothing registered yet
    assert_eq!(service.tick().await, HeartbeatOutcome::Skipped);

    service.set_on_heartbeat(|prompt| async move {
        assert_eq!(prompt, HEARTBEAT_PROMPT);
        Ok("All quiet. HEARTBEAT_OK".to_string())
    });
    assert_eq!(service.tick().await, HeartbeatOutcome::NothingToDo);

    service.set_on_heartbeat(|_prompt| async { Ok("Watered the plants.".to_string()) });
    assert_eq!(service.tick().await, HeartbeatOutcome::WorkDone);

    service.set_on_heartbeat(|_prompt| async { Err::<String, _>(anyhow::anyhow!("provider down")) });
    assert_eq!(
        service.tick().await,
        HeartbeatOutcome::Failed("provider down".to_string())
    );
}

#[tokio::test]
async fn test_trigger_now_ignores_file_content() {
    let (service, _temp) = create_test_service(Duration::from_secs(60));
    assert_eq!(assert_ok!(service.trigger_now().await), None);

    service.set_on_heartbeat(|_prompt| async { Ok("checked in".to_string()) });
    let reply = assert_ok!(service.trigger_now().await);
    assert_eq!(reply.as_deref(), Some("checked in"));

    service.set_on_heartbeat(|_prompt| async { Err::<String, _>(anyhow::anyhow!("boom")) });
    assert_err!(service.trigger_now().await);

    service.set_on_heartbeat(exploding_handler);
    let err = assert_err!(service.trigger_now().await);
    assert_eq!(err.to_string(), "panicked: provider exploded");
}

#[tokio::test]
async fn test_panicking_handler_reported_as_failure() {
    let (service, temp) = create_test_service(Duration::from_secs(60));
    write_tasks(&temp, "- [ ] rotate the logs\n");

    service.set_on_heartbeat(exploding_handler);
    assert_eq!(
        service.tick().await,
        HeartbeatOutcome::Failed("panicked: provider exploded".to_string())
    );
}

#[tokio::test]
async fn test_timer_survives_failed_ticks() {
    let (service, temp) = create_test_service(Duration::from_millis(30));
    write_tasks(&temp, "- [ ] check the inbox\n");
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = calls.clone();
        service.set_on_heartbeat(move |_prompt| {
            let calls = calls.clone();
            async move {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 => panic!("first tick blows up"),
                    1 => Err(anyhow::anyhow!("second tick fails")),
                    _ => Ok("HEARTBEAT_OK".to_string()),
                }
            }
        });
    }

    service.start();
    for _ in 0..100 {
        if calls.load(Ordering::SeqCst) >= 4 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(calls.load(Ordering::SeqCst) >= 4);
    assert!(service.is_running());
    service.stop().await;
    assert!(!service.is_running());
}

#[tokio::test]
async fn test_timer_fires_until_stopped() {
    let (service, temp) = create_test_service(Duration::from_millis(30));
    write_tasks(&temp, "- [ ] check the inbox\n");
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = calls.clone();
        service.set_on_heartbeat(move |_prompt| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("HEARTBEAT_OK".to_string())
            }
        });
    }

    service.start();
    assert!(service.is_running());

    for _ in 0..100 {
        if calls.load(Ordering::SeqCst) >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(calls.load(Ordering::SeqCst) >= 2);

    service.stop().await;
    assert!(!service.is_running());

    let after_stop = calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), after_stop);
}

#[tokio::test]
async fn test_disabled_service_never_starts() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let service = Arc::new(HeartbeatService::new(temp_dir.path(), Duration::from_millis(10), false));

    service.start();
    assert!(!service.is_running());
    service.stop().await;
}
