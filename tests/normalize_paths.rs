use std::path::Path;

use jobrunner::exec::normalize_command_line;
use jobrunner::fs::mock::MockFileSystem;
use jobrunner::fs::RealFileSystem;
use proptest::prelude::*;
use tempfile::tempdir;

#[test]
fn relative_readable_file_becomes_absolute() {
    let fs = MockFileSystem::new();
    fs.add_file("relfile.txt");
    fs.add_file("/abs/in.txt");

    let out = normalize_command_line("echo hello < /abs/in.txt relfile.txt", Path::new("/work"), &fs);

    assert_eq!(out, "echo hello < /abs/in.txt /work/relfile.txt");
}

#[test]
fn program_token_is_never_rewritten() {
    let fs = MockFileSystem::new();
    fs.add_file("tool.sh");

    let out = normalize_command_line("tool.sh tool.sh", Path::new("/work"), &fs);

    assert_eq!(out, "tool.sh /work/tool.sh");
}

#[test]
fn unreadable_files_and_directories_are_left_alone() {
    let fs = MockFileSystem::new();
    fs.add_unreadable_file("secret.txt");
    fs.add_dir("data");

    let out = normalize_command_line("cat secret.txt data", Path::new("/work"), &fs);

    assert_eq!(out, "cat secret.txt data");
}

#[test]
fn tokens_resolve_against_the_given_base() {
    let fs = MockFileSystem::new();
    fs.add_file("/inputs/reads.fq");

    let out = normalize_command_line("bwa mem reads.fq", Path::new("/inputs"), &fs);

    assert_eq!(out, "bwa mem /inputs/reads.fq");
}

#[test]
fn whitespace_runs_collapse_and_empty_stays_empty() {
    let fs = MockFileSystem::new();

    assert_eq!(normalize_command_line("  echo   a\tb  ", Path::new("/work"), &fs), "echo a b");
    assert_eq!(normalize_command_line("   ", Path::new("/work"), &fs), "");
}

#[test]
fn real_filesystem_rewrites_existing_files() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    std::fs::write(dir.path().join("in.txt"), "x")?;

    let out = normalize_command_line("wc -l in.txt missing.txt", dir.path(), &RealFileSystem);

    let expected = format!("wc -l {} missing.txt", dir.path().join("in.txt").display());
    assert_eq!(out, expected);
    Ok(())
}

proptest! {
    // Without any files on disk, normalization only collapses whitespace.
    #[test]
    fn no_files_means_only_whitespace_changes(tokens in proptest::collection::vec("[a-z0-9_./-]{1,12}", 1..8)) {
        let fs = MockFileSystem::new();
        let line = tokens.join("  ");

        let out = normalize_command_line(&line, Path::new("/work"), &fs);

        prop_assert_eq!(out, tokens.join(" "));
    }

    // Absolute tokens are kept verbatim even when they exist.
    #[test]
    fn absolute_tokens_are_untouched(name in "[a-z]{1,10}") {
        let fs = MockFileSystem::new();
        let abs = format!("/data/{name}");
        fs.add_file(&abs);

        let out = normalize_command_line(&format!("cat {abs}"), Path::new("/work"), &fs);

        prop_assert_eq!(out, format!("cat {abs}"));
    }
}
