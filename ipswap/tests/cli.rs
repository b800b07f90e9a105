use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const PNG: &[u8] = b"\x89PNG\r\n\x1a\nrest";

fn ipswap_in(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("ipswap").expect("Binary exists");
    cmd.current_dir(dir.path())
        .env_remove("OPENAI_BASE_URL")
        .env_remove("OPENAI_API_KEY");
    cmd
}

#[test]
fn help_lists_both_subcommands() {
    let dir = TempDir::new().unwrap();
    ipswap_in(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("batch").and(predicate::str::contains("one")));
}

#[test]
fn batch_without_credentials_fails_before_any_work() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("imgs")).unwrap();
    fs::write(dir.path().join("monkey-ip.png"), PNG).unwrap();

    ipswap_in(&dir)
        .arg("batch")
        .assert()
        .failure()
        .stderr(predicate::str::contains("OPENAI_BASE_URL"));
    assert!(!dir.path().join("imgs_monkey").exists());
}

#[test]
fn batch_with_missing_input_dir_fails() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("monkey-ip.png"), PNG).unwrap();

    ipswap_in(&dir)
        .env("OPENAI_BASE_URL", "http://127.0.0.1:9/v1")
        .env("OPENAI_API_KEY", "test-key")
        .args(["batch", "--imgs-dir", "nowhere"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Input directory not found"));
}

#[test]
fn batch_with_missing_reference_fails() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("imgs")).unwrap();

    ipswap_in(&dir)
        .env("OPENAI_BASE_URL", "http://127.0.0.1:9/v1")
        .env("OPENAI_API_KEY", "test-key")
        .arg("batch")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Reference image not found"));
}

#[test]
fn batch_with_nothing_to_do_prints_summary() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("imgs")).unwrap();
    fs::write(dir.path().join("imgs/anim.gif"), b"GIF89a").unwrap();
    fs::write(dir.path().join("monkey-ip.png"), PNG).unwrap();

    ipswap_in(&dir)
        .env("OPENAI_BASE_URL", "http://127.0.0.1:9/v1")
        .env("OPENAI_API_KEY", "test-key")
        .arg("batch")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Input images (new): 0")
                .and(predicate::str::contains("Done."))
                .and(predicate::str::contains("Manifest:"))
                .and(predicate::str::contains("Failures:").not()),
        );
    assert!(dir.path().join("imgs_monkey").is_dir());
}

#[test]
fn one_with_empty_input_dir_fails() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("imgs")).unwrap();
    fs::write(dir.path().join("monkey-ip.png"), PNG).unwrap();

    ipswap_in(&dir)
        .env("OPENAI_BASE_URL", "http://127.0.0.1:9/v1")
        .env("OPENAI_API_KEY", "test-key")
        .arg("one")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No non-GIF images found"));
}

use std::sync::{Arc, Mutex};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{layer::Context, Layer, Registry};

/// Collects the debug rendering of every emitted event.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        self.events.lock().unwrap().push(format!("{:?}", event));
    }
}

#[tokio::test]
async fn emits_run_started_event() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector {
        events: events.clone(),
    };
    let subscriber = Registry::default().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    use ipswap::cli::{run, BatchArgs, Cli, Commands};

    let cli = Cli {
        command: Commands::Batch(BatchArgs {
            imgs_dir: Some("definitely-missing-dir".into()),
            ..BatchArgs::default()
        }),
    };

    let _ = run(cli).await;

    let event_msgs = events.lock().unwrap();
    assert!(
        event_msgs.iter().any(|msg| msg.contains("run_started")),
        "Expected a 'run_started' trace event, got: {:?}",
        event_msgs
    );
}
