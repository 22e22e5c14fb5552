//! Clean steps remove directories below the root and nothing else.

use anvil::actions::{Action, CleanAction};
use anvil::context::BuildContext;

#[tokio::test]
async fn removes_templated_directories() {
    let root = tempfile::tempdir().expect("tempdir");
    let out = root.path().join("bin/Release");
    std::fs::create_dir_all(out.join("x64")).expect("mkdir");
    std::fs::write(out.join("x64/app.exe"), b"MZ").expect("write");
    std::fs::create_dir_all(root.path().join("src")).expect("mkdir");

    let ctx = BuildContext::new(root.path()).with_configuration("Release");
    CleanAction::new(vec!["bin/{configuration}".to_owned()])
        .execute(&ctx)
        .await
        .expect("clean");

    assert!(!out.exists());
    assert!(root.path().join("bin").is_dir());
    assert!(root.path().join("src").is_dir());
}

#[tokio::test]
async fn absent_directory_is_not_an_error() {
    let root = tempfile::tempdir().expect("tempdir");
    let ctx = BuildContext::new(root.path());

    let result = CleanAction::new(vec!["obj".to_owned(), "bin".to_owned()])
        .execute(&ctx)
        .await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn refuses_paths_outside_the_root() {
    let parent = tempfile::tempdir().expect("tempdir");
    let root = parent.path().join("repo");
    let sibling = parent.path().join("precious");
    std::fs::create_dir_all(&root).expect("mkdir");
    std::fs::create_dir_all(&sibling).expect("mkdir");
    let ctx = BuildContext::new(&root);

    let err = CleanAction::new(vec!["../precious".to_owned()])
        .execute(&ctx)
        .await
        .expect_err("escape refused");

    assert_eq!(err.kind(), "action_failed");
    assert!(sibling.is_dir());
}

#[tokio::test]
async fn refuses_the_root_itself() {
    let root = tempfile::tempdir().expect("tempdir");
    let ctx = BuildContext::new(root.path());

    let result = CleanAction::new(vec![".".to_owned()]).execute(&ctx).await;

    assert!(result.is_err());
    assert!(root.path().is_dir());
}

#[test]
fn describe_lists_directories() {
    let action = CleanAction::new(vec!["bin".to_owned(), "obj".to_owned()]);
    assert_eq!(action.describe(), "clean bin, obj");
}
