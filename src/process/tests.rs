//! Unit tests for the process runner.

use super::*;
use rstest::rstest;

#[rstest]
fn command_line_quotes_arguments_with_spaces() {
    let invocation = Invocation::new("/usr/bin/python")
        .arg("schedule georep.py")
        .arg("master")
        .arg("it's");

    assert_eq!(
        invocation.command_line(),
        "/usr/bin/python 'schedule georep.py' master 'it'\\''s'"
    );
}

#[rstest]
fn output_splits_lines_without_terminators() {
    let output = CommandOutput {
        code: Some(0),
        stdout: String::from("first\nsecond\n"),
        stderr: String::from("warn\r\n"),
    };

    assert_eq!(output.stdout_lines(), vec!["first", "second"]);
    assert_eq!(output.stderr_lines(), vec!["warn"]);
}

#[rstest]
#[case(Some(0), true, "0")]
#[case(Some(2), false, "2")]
#[case(None, false, "unknown")]
fn output_reports_status(#[case] code: Option<i32>, #[case] success: bool, #[case] text: &str) {
    let output = CommandOutput {
        code,
        stdout: String::new(),
        stderr: String::new(),
    };

    assert_eq!(output.is_success(), success);
    assert_eq!(output.status_text(), text);
}

#[rstest]
fn process_runner_captures_streams_and_exit_code() {
    let invocation = Invocation::new("sh")
        .arg("-c")
        .arg("echo out; echo err >&2; exit 3");

    let output = ProcessCommandRunner
        .run(&invocation)
        .expect("sh should spawn");

    assert_eq!(output.code, Some(3));
    assert_eq!(output.stdout_lines(), vec!["out"]);
    assert_eq!(output.stderr_lines(), vec!["err"]);
}

#[rstest]
fn process_runner_feeds_stdin_and_env() {
    let invocation = Invocation::new("sh")
        .arg("-c")
        .arg("cat; printf '%s' \"$GEOSNAP_PROBE\"")
        .stdin("piped input\n")
        .env("GEOSNAP_PROBE", "probe-value");

    let output = ProcessCommandRunner
        .run(&invocation)
        .expect("sh should spawn");

    assert!(output.is_success());
    assert_eq!(output.stdout, "piped input\nprobe-value");
}

#[rstest]
fn process_runner_drains_output_while_feeding_large_input() {
    let input = vec![b'x'; 200_000];
    let invocation = Invocation::new("sh")
        .arg("-c")
        .arg("head -c 200000 /dev/zero | tr '\\0' 'y'; wc -c")
        .stdin(input);

    let output = ProcessCommandRunner
        .run(&invocation)
        .expect("sh should spawn");

    assert!(output.is_success());
    let (filler, count) = output.stdout.split_at(200_000);
    assert!(filler.bytes().all(|byte| byte == b'y'));
    assert_eq!(count.trim(), "200000");
}

#[rstest]
fn process_runner_tolerates_child_ignoring_stdin() {
    let invocation = Invocation::new("sh")
        .arg("-c")
        .arg("exec 0<&-; echo done")
        .stdin(vec![b'x'; 200_000]);

    let output = ProcessCommandRunner
        .run(&invocation)
        .expect("closed stdin is not an error");

    assert_eq!(output.stdout_lines(), vec!["done"]);
}

#[rstest]
fn process_runner_honours_working_directory() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let dir = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf8 tempdir");
    let invocation = Invocation::new("pwd").cwd(dir.clone());

    let output = ProcessCommandRunner
        .run(&invocation)
        .expect("pwd should spawn");

    let reported = output.stdout.trim();
    let canonical = dir
        .canonicalize_utf8()
        .expect("tempdir should canonicalise");
    assert_eq!(reported, canonical.as_str());
}

#[rstest]
fn process_runner_reports_spawn_failure() {
    let invocation = Invocation::new("/nonexistent/geosnap-missing-binary");

    let err = ProcessCommandRunner
        .run(&invocation)
        .expect_err("missing binary should fail to spawn");

    assert!(
        matches!(err, ProcessError::Spawn { ref program, .. } if program == "/nonexistent/geosnap-missing-binary"),
        "unexpected error: {err}"
    );
}
