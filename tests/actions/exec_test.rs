//! External process steps.

use std::collections::BTreeMap;

use anvil::actions::{Action, ActionError, ExecAction};
use anvil::context::BuildContext;

#[cfg(unix)]
#[tokio::test]
async fn nonzero_exit_is_a_failure() {
    let root = tempfile::tempdir().expect("tempdir");
    let ctx = BuildContext::new(root.path());

    let err = ExecAction::new("sh", vec!["-c".to_owned(), "exit 3".to_owned()])
        .execute(&ctx)
        .await
        .expect_err("exit 3");

    match err {
        ActionError::ProcessFailed { program, status } => {
            assert_eq!(program, "sh");
            assert!(status.contains('3'), "status was {status}");
        }
        other => panic!("expected process failure, got {other}"),
    }
}

#[tokio::test]
async fn missing_program_fails_to_spawn() {
    let root = tempfile::tempdir().expect("tempdir");
    let ctx = BuildContext::new(root.path());

    let err = ExecAction::new("anvil-no-such-program-4f1c", Vec::new())
        .execute(&ctx)
        .await
        .expect_err("not on PATH");

    assert_eq!(err.kind(), "spawn");
}

#[cfg(unix)]
#[tokio::test]
async fn per_platform_runs_once_for_each_platform() {
    let root = tempfile::tempdir().expect("tempdir");
    let ctx = BuildContext::new(root.path())
        .with_configuration("Release")
        .with_platforms(["Win32", "x64"]);

    ExecAction::new(
        "sh",
        vec![
            "-c".to_owned(),
            "echo {configuration} > built-{platform}.txt".to_owned(),
        ],
    )
    .per_platform(true)
    .execute(&ctx)
    .await
    .expect("both platforms");

    for platform in ["Win32", "x64"] {
        let marker = root.path().join(format!("built-{platform}.txt"));
        let text = std::fs::read_to_string(&marker).expect("marker written");
        assert_eq!(text.trim(), "Release");
    }
}

#[cfg(unix)]
#[tokio::test]
async fn cwd_and_env_are_applied() {
    let root = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir_all(root.path().join("work")).expect("mkdir");
    let ctx = BuildContext::new(root.path()).with_build_version(Some("2.0.1.7".to_owned()));
    let mut env = BTreeMap::new();
    env.insert("ANVIL_TEST_VERSION".to_owned(), "{version}".to_owned());

    ExecAction::new(
        "sh",
        vec!["-c".to_owned(), "echo $ANVIL_TEST_VERSION > out.txt".to_owned()],
    )
    .with_cwd(Some("work".to_owned()))
    .with_env(env)
    .execute(&ctx)
    .await
    .expect("exec");

    let text = std::fs::read_to_string(root.path().join("work/out.txt")).expect("read");
    assert_eq!(text.trim(), "2.0.1.7");
}

#[tokio::test]
async fn per_platform_without_platforms_is_an_error() {
    let root = tempfile::tempdir().expect("tempdir");
    let ctx = BuildContext::new(root.path());

    let err = ExecAction::new("true", Vec::new())
        .per_platform(true)
        .execute(&ctx)
        .await
        .expect_err("no platforms");

    assert!(err.to_string().contains("no platforms"));
}

#[tokio::test]
async fn unknown_placeholder_fails_before_spawning() {
    let root = tempfile::tempdir().expect("tempdir");
    let ctx = BuildContext::new(root.path());

    let err = ExecAction::new("anvil-no-such-program-4f1c", vec!["{solution}".to_owned()])
        .execute(&ctx)
        .await
        .expect_err("unknown placeholder");

    assert_eq!(err.kind(), "template");
}

#[test]
fn describe_shows_command_line() {
    let action = ExecAction::new("msbuild", vec!["Device.sln".to_owned(), "/m".to_owned()]).per_platform(true);
    assert_eq!(action.describe(), "msbuild Device.sln /m (per platform)");
}
