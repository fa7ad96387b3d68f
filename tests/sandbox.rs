use std::{fs, path::PathBuf, time::Duration};

use scenario_workbench::{
    controller::classify::{classify, ErrorKind, Verdict},
    sandbox::{ExitStatus, Sandbox},
};

#[tokio::test]
async fn reports_only_files_created_by_this_invocation() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("existing.csv"), "old").expect("write");
    let script = dir.path().join("make.sh");
    fs::write(
        &script,
        "echo new > existing.csv\nmkdir -p charts\necho png > charts/plot.png\necho ok > result.csv\necho written\n",
    )
    .expect("script");

    let outcome = Sandbox::new("sh")
        .execute(&script, dir.path(), Duration::from_secs(10))
        .await
        .expect("execute");

    assert_eq!(outcome.exit_status, ExitStatus::Exited(0));
    assert_eq!(outcome.stdout, "written\n");
    assert_eq!(outcome.new_files, vec![PathBuf::from("charts/plot.png"), PathBuf::from("result.csv")]);
}

#[tokio::test]
async fn output_is_captured_in_full() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = dir.path().join("loud.sh");
    fs::write(&script, "i=0\nwhile [ $i -lt 5000 ]; do echo line $i >&2; i=$((i+1)); done\nexit 2\n")
        .expect("script");

    let outcome = Sandbox::new("sh")
        .execute(&script, dir.path(), Duration::from_secs(20))
        .await
        .expect("execute");

    assert_eq!(outcome.exit_status, ExitStatus::Exited(2));
    assert_eq!(outcome.stderr.lines().count(), 5000);
    assert_eq!(outcome.stderr.lines().last(), Some("line 4999"));
}

#[tokio::test]
async fn timeout_is_distinct_from_script_errors() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = dir.path().join("slow.sh");
    fs::write(&script, "echo started\nexec sleep 10\n").expect("script");

    let outcome = Sandbox::new("sh")
        .execute(&script, dir.path(), Duration::from_millis(300))
        .await
        .expect("execute");

    assert_eq!(outcome.exit_status, ExitStatus::TimedOut);
    assert!(outcome.elapsed < Duration::from_secs(5));
    assert_eq!(outcome.stdout, "started\n");
    let classification = classify(&outcome);
    assert_eq!(classification.verdict, Verdict::Retryable(ErrorKind::Timeout));
}

/// Live and not a zombie waiting to be reaped.
#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    match fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => !stat
            .rsplit(')')
            .next()
            .map(|rest| rest.trim_start().starts_with('Z'))
            .unwrap_or(false),
        Err(_) => false,
    }
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn timeout_kills_background_jobs_and_keeps_partial_output() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = dir.path().join("spawner.sh");
    fs::write(
        &script,
        "echo started\necho progress >&2\nsleep 37 &\necho $! > sleeper.pid\nwait\necho never\n",
    )
    .expect("script");

    let outcome = Sandbox::new("sh")
        .execute(&script, dir.path(), Duration::from_millis(500))
        .await
        .expect("execute");

    assert_eq!(outcome.exit_status, ExitStatus::TimedOut);
    assert_eq!(outcome.stdout, "started\n");
    assert_eq!(outcome.stderr, "progress\n");
    assert!(outcome.elapsed < Duration::from_secs(5));

    let pid: u32 = fs::read_to_string(dir.path().join("sleeper.pid"))
        .expect("pid file")
        .trim()
        .parse()
        .expect("pid");
    let mut alive = process_alive(pid);
    for _ in 0..20 {
        if !alive {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        alive = process_alive(pid);
    }
    assert!(!alive, "background sleep {pid} survived the timeout");
}

#[tokio::test]
async fn working_directory_is_the_given_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = dir.path().join("pwd.sh");
    fs::write(&script, "pwd\n").expect("script");

    let outcome = Sandbox::new("sh")
        .execute(&script, dir.path(), Duration::from_secs(10))
        .await
        .expect("execute");

    let reported = PathBuf::from(outcome.stdout.trim());
    assert_eq!(
        fs::canonicalize(reported).expect("canonical"),
        fs::canonicalize(dir.path()).expect("canonical")
    );
}

#[tokio::test]
async fn missing_interpreter_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = dir.path().join("x.sh");
    fs::write(&script, "echo hi\n").expect("script");
    let result = Sandbox::new("definitely-not-an-interpreter")
        .execute(&script, dir.path(), Duration::from_secs(1))
        .await;
    assert!(result.is_err());
}
