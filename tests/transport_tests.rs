use std::path::PathBuf;

use fleet_distribute::config::CommandTransportConfig;
use fleet_distribute::distribution::{AfterAction, ArtifactRef, PushOptions, TargetRef};
use fleet_distribute::transport::{CommandTransport, TargetOutcome, TargetTransport};

fn transport(command: &str) -> CommandTransport {
    CommandTransport::new(CommandTransportConfig::new(command))
}

fn target() -> TargetRef {
    TargetRef::new("node-7", "api", 0)
}

fn artifact() -> ArtifactRef {
    ArtifactRef::File(PathBuf::from("/var/artifacts/web-1.2.3.zip"))
}

#[tokio::test]
async fn test_push_success() {
    let outcome = transport("true")
        .push(&target(), &artifact(), &PushOptions::default())
        .await;
    assert_eq!(outcome, TargetOutcome::Ok);
}

#[tokio::test]
async fn test_push_failure_reports_stderr() {
    let outcome = transport("echo 'disk full' >&2; exit 3")
        .push(&target(), &artifact(), &PushOptions::default())
        .await;
    assert_eq!(outcome, TargetOutcome::Fail("disk full".to_string()));
}

#[tokio::test]
async fn test_push_failure_without_stderr_reports_exit_code() {
    let outcome = transport("exit 2")
        .push(&target(), &artifact(), &PushOptions::default())
        .await;
    match outcome {
        TargetOutcome::Fail(reason) => assert!(reason.contains("2"), "reason: {}", reason),
        TargetOutcome::Ok => panic!("expected failure"),
    }
}

#[tokio::test]
async fn test_push_sees_target_environment() {
    let command = r#"test "$DIST_NODE_ID" = node-7 && test "$DIST_UNIT_ID" = api && test "$DIST_ARTIFACT" = /var/artifacts/web-1.2.3.zip"#;
    let outcome = transport(command)
        .push(&target(), &artifact(), &PushOptions::default())
        .await;
    assert_eq!(outcome, TargetOutcome::Ok);
}

#[tokio::test]
async fn test_push_receives_options_as_json() {
    let options = PushOptions {
        after: AfterAction::Restart,
        unzip: true,
        ..PushOptions::default()
    };
    let outcome = transport(r#"echo "$DIST_OPTIONS" | grep -q '"after":"restart"'"#)
        .push(&target(), &artifact(), &options)
        .await;
    assert_eq!(outcome, TargetOutcome::Ok);
}

#[tokio::test]
async fn test_url_artifact_is_passed_verbatim() {
    let outcome = transport(r#"test "$DIST_ARTIFACT" = "https://builds.example.com/a.zip""#)
        .push(
            &target(),
            &ArtifactRef::Url("https://builds.example.com/a.zip".to_string()),
            &PushOptions::default(),
        )
        .await;
    assert_eq!(outcome, TargetOutcome::Ok);
}

#[tokio::test]
async fn test_push_timeout_is_a_failure() {
    let config = CommandTransportConfig {
        timeout_secs: Some(1),
        ..CommandTransportConfig::new("sleep 10")
    };
    let start = std::time::Instant::now();
    let outcome = CommandTransport::new(config)
        .push(&target(), &artifact(), &PushOptions::default())
        .await;

    assert!(start.elapsed() < std::time::Duration::from_secs(5));
    match outcome {
        TargetOutcome::Fail(reason) => assert!(reason.contains("timed out")),
        TargetOutcome::Ok => panic!("expected timeout"),
    }
}

#[tokio::test]
async fn test_missing_shell_is_a_failure() {
    let config = CommandTransportConfig {
        shell: "/nonexistent/shell".to_string(),
        ..CommandTransportConfig::new("true")
    };
    let outcome = CommandTransport::new(config)
        .push(&target(), &artifact(), &PushOptions::default())
        .await;
    assert!(!outcome.is_ok());
}
