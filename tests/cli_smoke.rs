//! End-to-end runs of the `bvfs` binary

use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn bvfs(image: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_bvfs"))
        .arg(image)
        .args(args)
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_format_put_cat_ls() {
    let dir = TempDir::new().unwrap();
    let image = dir.path().join("cli.bvfs");
    let src = dir.path().join("hello.txt");
    std::fs::write(&src, b"hello from the host").unwrap();

    assert!(bvfs(&image, &["format"]).status.success());
    assert!(bvfs(&image, &["mkdir", "/abc"]).status.success());

    let put = bvfs(&image, &["put", src.to_str().unwrap(), "/abc/hello.txt"]);
    assert!(put.status.success(), "{}", String::from_utf8_lossy(&put.stderr));

    let cat = bvfs(&image, &["cat", "/abc/hello.txt"]);
    assert!(cat.status.success());
    assert_eq!(cat.stdout, b"hello from the host");

    let ls = stdout(&bvfs(&image, &["ls", "/abc"]));
    assert!(ls.contains("-rw-r--r--"));
    assert!(ls.contains("hello.txt"));
    assert!(ls.contains(" 19 "));

    let root = stdout(&bvfs(&image, &["ls"]));
    assert!(root.starts_with("drwxr-xr-x"));
}

#[test]
fn test_format_refuses_existing_without_force() {
    let dir = TempDir::new().unwrap();
    let image = dir.path().join("twice.bvfs");

    assert!(bvfs(&image, &["format"]).status.success());
    assert!(!bvfs(&image, &["format"]).status.success());
    assert!(bvfs(&image, &["format", "--force"]).status.success());
}

#[test]
fn test_stats_json_and_trim() {
    let dir = TempDir::new().unwrap();
    let image = dir.path().join("stats.bvfs");
    let src = dir.path().join("big.bin");
    std::fs::write(&src, vec![9u8; 5000]).unwrap();

    bvfs(&image, &["format"]);
    bvfs(&image, &["put", src.to_str().unwrap(), "/big.bin"]);

    let json = stdout(&bvfs(&image, &["stats", "--json"]));
    let stats: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(stats["data_blocks"], 6);
    assert_eq!(stats["free_blocks"], 0);

    assert!(bvfs(&image, &["rm", "/big.bin"]).status.success());
    let trim = stdout(&bvfs(&image, &["trim"]));
    assert!(trim.contains("Removed 8 trailing free blocks"));
    assert_eq!(std::fs::metadata(&image).unwrap().len(), 2048);
}

#[test]
fn test_dump_and_unlock() {
    let dir = TempDir::new().unwrap();
    let image = dir.path().join("dump.bvfs");
    bvfs(&image, &["format"]);

    let dump = stdout(&bvfs(&image, &["dump"]));
    assert!(dump.starts_with("Short View:\n0 0x0: Root\n1 0x400: Directory\n"));
    assert!(dump.contains("Detailed View:"));

    let unlock = stdout(&bvfs(&image, &["unlock"]));
    assert!(unlock.contains("was not locked"));
}

#[test]
fn test_reuse_policy_flag_is_validated() {
    let dir = TempDir::new().unwrap();
    let image = dir.path().join("policy.bvfs");
    bvfs(&image, &["format"]);

    assert!(bvfs(&image, &["--reuse-policy", "forward-only", "ls"]).status.success());
    assert!(!bvfs(&image, &["--reuse-policy", "sideways", "ls"]).status.success());
}
