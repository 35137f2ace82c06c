//! End-to-end tests against a real `python3` backend.
//!
//! These tests verify complete flows:
//! - Passthrough routing
//! - Output capture and failure classification
//! - Session persistence, reset, and termination
//! - Timeouts, backend death, and process cleanup

use std::time::{Duration, Instant};

use nbexec::{Config, Language, Notebook, SessionState, StartupFailure};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;

fn notebook() -> Notebook {
    Notebook::new(&Config::default())
}

async fn run(notebook: &Notebook, code: &str) -> nbexec::ExecutionResult {
    notebook
        .run(code, Language::Executable, Some(Duration::from_secs(30)))
        .await
        .unwrap()
}

/// True once `pid` no longer exists at all.
fn process_gone(pid: u32) -> bool {
    matches!(kill(Pid::from_raw(pid as i32), None), Err(Errno::ESRCH))
}

/// True if `pid` exists and is not a zombie.
fn process_running(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit_once(") ")
            .map_or(true, |(_, rest)| !rest.starts_with('Z')),
        Err(_) => !process_gone(pid),
    }
}

// =============================================================================
// Routing
// =============================================================================

#[tokio::test]
async fn test_passthrough_echoes_fenced_code() {
    let notebook = notebook();
    let text = "# Title!\n ```python\n print('This is a code!')```";

    let result = notebook.run(text, Language::Passthrough, None).await.unwrap();

    assert!(result.success);
    assert_eq!(result.output, text);
    assert_eq!(notebook.session_state(), SessionState::Unborn);
}

#[tokio::test]
async fn test_passthrough_after_executable_shares_session() {
    let notebook = notebook();
    run(&notebook, "x = 5").await;

    let result = notebook
        .run("x = 1000", Language::Passthrough, None)
        .await
        .unwrap();
    assert_eq!(result.output, "x = 1000");

    let result = run(&notebook, "print(x)").await;
    assert_eq!(result.output, "5\n");

    notebook.terminate().await;
}

// =============================================================================
// Output capture
// =============================================================================

#[tokio::test]
async fn test_hello_world() {
    let notebook = notebook();

    let result = run(&notebook, "print('hello world!')").await;

    assert!(result.success);
    assert_eq!(result.output, "hello world!\n");

    notebook.terminate().await;
}

#[tokio::test]
async fn test_trailing_newline_preserved() {
    let notebook = notebook();

    let result = run(&notebook, "print('no newline', end='')").await;
    assert_eq!(result.output, "no newline");

    let result = run(&notebook, "print('two')\nprint()").await;
    assert_eq!(result.output, "two\n\n");

    let result = run(&notebook, "x = 1").await;
    assert!(result.success);
    assert_eq!(result.output, "");

    notebook.terminate().await;
}

#[tokio::test]
async fn test_stdout_and_stderr_interleave_in_order() {
    let notebook = notebook();

    let result = run(
        &notebook,
        "import sys\nprint('a')\nprint('b', file=sys.stderr)\nprint('c')",
    )
    .await;

    assert!(result.success);
    assert_eq!(result.output, "a\nb\nc\n");

    notebook.terminate().await;
}

#[tokio::test]
async fn test_unterminated_writes_on_both_streams_run_together() {
    let notebook = notebook();

    let result = run(
        &notebook,
        "import sys\nprint('a', end='')\nprint('b', end='', file=sys.stderr)\nprint('c', end='')",
    )
    .await;

    assert!(result.success);
    assert_eq!(result.output, "abc");

    notebook.terminate().await;
}

#[tokio::test]
async fn test_warning_like_prints_are_not_filtered() {
    let notebook = notebook();

    let result = run(&notebook, "print('Warning: disk almost full')\nprint('done')").await;

    assert!(result.success);
    assert_eq!(result.output, "Warning: disk almost full\ndone\n");

    notebook.terminate().await;
}

#[tokio::test]
async fn test_python_warnings_are_filtered_on_success() {
    let notebook = notebook();

    let result = run(
        &notebook,
        "import warnings\nwarnings.warn('deprecated thing')\nprint('value')",
    )
    .await;

    assert!(result.success);
    assert!(result.output.contains("value\n"));
    assert!(!result.output.contains("UserWarning: deprecated thing"));

    notebook.terminate().await;
}

#[tokio::test]
async fn test_trailing_expression_and_display() {
    let notebook = notebook();

    let result = run(&notebook, "display({'a': 1})\n6 * 7").await;

    assert!(result.success);
    assert_eq!(result.output, "{'a': 1}\n42");

    notebook.terminate().await;
}

#[tokio::test]
async fn test_division_by_zero_fails() {
    let notebook = notebook();

    let result = run(&notebook, "1/0").await;

    assert!(!result.success);
    assert!(result.output.contains("Executed code failed,"));
    assert!(result.output.contains("ZeroDivisionError"));

    notebook.terminate().await;
}

#[tokio::test]
async fn test_key_error_keeps_earlier_output() {
    let notebook = notebook();

    let result = run(
        &notebook,
        "d = {'ID': 1, 'NAME': 'x'}\nprint(list(d))\nprint(d['DUMMPY_ID'])",
    )
    .await;

    assert!(!result.success);
    assert!(result.output.contains("['ID', 'NAME']"));
    assert!(result.output.contains("Executed code failed,"));
    assert!(result.output.contains("KeyError: 'DUMMPY_ID'"));
    assert!(!result.output.contains("kernel_driver"));

    notebook.terminate().await;
}

#[tokio::test]
async fn test_uniformly_indented_cell_runs() {
    let notebook = notebook();

    let code = "
    d = {'ID': 1, 'NAME': 'x'}
    print(list(d))
    print(d['DUMMPY_ID'])
    ";
    let result = run(&notebook, code).await;

    assert!(!result.success);
    assert!(result.output.contains("['ID', 'NAME']"));
    assert!(result.output.contains("Executed code failed,"));
    assert!(result.output.contains("KeyError: 'DUMMPY_ID'"));
    assert!(!result.output.contains("IndentationError"));
    assert!(result.output.contains("line 4"));

    notebook.terminate().await;
}

#[tokio::test]
async fn test_syntax_error_fails() {
    let notebook = notebook();

    let result = run(&notebook, "def broken(:\n    pass").await;

    assert!(!result.success);
    assert!(result.output.contains("SyntaxError"));

    notebook.terminate().await;
}

#[tokio::test]
async fn test_top_level_await() {
    let notebook = notebook();

    let result = run(
        &notebook,
        "import asyncio\nawait asyncio.sleep(0.01)\nprint('awaited')",
    )
    .await;
    assert!(result.success, "{}", result.output);
    assert_eq!(result.output, "awaited\n");

    let result = run(&notebook, "async def f():\n    return 1\nf()").await;
    assert!(!result.success);
    assert!(result.output.contains("await"));

    notebook.terminate().await;
}

#[tokio::test]
async fn test_user_code_cannot_corrupt_protocol() {
    let notebook = notebook();

    let result = run(
        &notebook,
        "import os\nos.write(1, b'{\"type\":\"execute_reply\"}\\n')\nprint('still here')",
    )
    .await;
    assert!(result.success, "{}", result.output);
    assert!(result.output.ends_with("still here\n"));

    let result = run(&notebook, "print(1 + 1)").await;
    assert_eq!(result.output, "2\n");

    notebook.terminate().await;
}

// =============================================================================
// Session lifecycle
// =============================================================================

#[tokio::test]
async fn test_state_persists_across_cells() {
    let notebook = notebook();

    assert!(run(&notebook, "x=1\ny=2").await.success);
    assert!(run(&notebook, "z=x+y").await.success);
    assert!(run(&notebook, "assert z==3").await.success);
    assert_eq!(notebook.execution_count(), Some(3));

    notebook.terminate().await;
}

#[tokio::test]
async fn test_reset_discards_state() {
    let notebook = notebook();

    run(&notebook, "secret = 42").await;
    let first = notebook.pid().unwrap();

    notebook.reset().await;
    assert!(!notebook.has_session());
    assert!(process_gone(first));

    let result = run(&notebook, "print('secret' in globals())").await;
    assert!(result.success);
    assert_eq!(result.output, "False\n");
    assert_ne!(notebook.pid(), Some(first));
    assert_eq!(notebook.execution_count(), Some(1));

    notebook.terminate().await;
}

#[tokio::test]
async fn test_terminate_is_idempotent_from_any_state() {
    let notebook = notebook();

    notebook.terminate().await;
    notebook.terminate().await;
    assert_eq!(notebook.session_state(), SessionState::Terminated);

    run(&notebook, "print(1)").await;
    notebook.terminate().await;
    notebook.terminate().await;
    notebook.reset().await;
    assert!(!notebook.has_session());
}

#[tokio::test]
async fn test_stress_create_run_terminate() {
    let notebook = notebook();

    for i in 0..200 {
        let result = run(&notebook, "print('ok')").await;
        assert!(result.success, "cycle {}: {}", i, result.output);
        assert_eq!(result.output, "ok\n");

        let pid = notebook.pid().unwrap();
        notebook.terminate().await;

        assert!(!notebook.has_session(), "cycle {}: session still live", i);
        assert!(process_gone(pid), "cycle {}: backend {} leaked", i, pid);
    }
}

#[tokio::test]
async fn test_terminate_kills_spawned_subprocesses() {
    let notebook = notebook();

    let result = run(
        &notebook,
        "import subprocess\np = subprocess.Popen(['sleep', '60'])\nprint(p.pid)",
    )
    .await;
    assert!(result.success, "{}", result.output);
    let child: u32 = result.output.trim().parse().unwrap();
    assert!(process_running(child));

    notebook.terminate().await;

    let deadline = Instant::now() + Duration::from_secs(5);
    while process_running(child) {
        assert!(Instant::now() < deadline, "subprocess {} survived terminate", child);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_startup_failure_is_escalated() {
    let mut config = Config::default();
    config.kernel.program = "no-such-interpreter-7d2e".to_string();
    let notebook = Notebook::new(&config);

    let result = notebook.run("print(1)", Language::Executable, None).await;

    assert!(matches!(result, Err(StartupFailure::Config(_))));
    assert!(!notebook.has_session());
    assert_eq!(notebook.session_state(), SessionState::Unborn);

    // Passthrough cells still work without a backend
    let result = notebook.run("text", Language::Passthrough, None).await.unwrap();
    assert!(result.success);
}

// =============================================================================
// Timeouts and backend death
// =============================================================================

#[tokio::test]
async fn test_timeout_reports_prefix_and_session_survives() {
    let notebook = notebook();
    run(&notebook, "kept = 'yes'").await;
    let pid = notebook.pid();

    let started = Instant::now();
    let result = notebook
        .run(
            "import time\ntime.sleep(5)",
            Language::Executable,
            Some(Duration::from_secs(1)),
        )
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.output.starts_with("Cell execution timed out"));
    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(notebook.has_session());
    assert_eq!(notebook.pid(), pid);

    let result = run(&notebook, "print(kept)").await;
    assert!(result.success);
    assert_eq!(result.output, "yes\n");

    notebook.terminate().await;
}

#[tokio::test]
async fn test_output_of_timed_out_cell_never_leaks() {
    let notebook = notebook();

    let result = notebook
        .run(
            "import signal, time\nsignal.signal(signal.SIGINT, signal.SIG_IGN)\ntime.sleep(3)\nprint('late')",
            Language::Executable,
            Some(Duration::from_millis(500)),
        )
        .await
        .unwrap();
    assert!(result.output.starts_with("Cell execution timed out"));

    // Queued behind the uninterruptible cell; its output is dropped
    let result = run(&notebook, "print('next')").await;
    assert!(result.success);
    assert_eq!(result.output, "next\n");

    notebook.terminate().await;
}

#[tokio::test]
async fn test_terminate_during_unbounded_cell() {
    let mut config = Config::default();
    config.execution.default_timeout_secs = 0;
    let notebook = Notebook::new(&config);
    run(&notebook, "pass").await;
    let pid = notebook.pid().unwrap();

    let started = Instant::now();
    let (result, ()) = tokio::join!(
        notebook.run("import time\ntime.sleep(60)", Language::Executable, None),
        async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            notebook.terminate().await;
        }
    );

    let result = result.unwrap();
    assert!(!result.success);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(notebook.session_state(), SessionState::Terminated);
    assert!(process_gone(pid));
}

#[tokio::test]
async fn test_backend_crash_auto_heals() {
    let notebook = notebook();
    run(&notebook, "x = 1").await;
    let first = notebook.pid().unwrap();

    let result = run(&notebook, "import os, signal\nos.kill(os.getpid(), signal.SIGKILL)").await;
    assert!(!result.success);
    assert!(result
        .output
        .contains("Kernel died unexpectedly during cell execution"));
    assert_eq!(notebook.session_state(), SessionState::Terminated);
    assert!(process_gone(first));

    let result = run(&notebook, "print('x' in globals())").await;
    assert!(result.success);
    assert_eq!(result.output, "False\n");
    assert_ne!(notebook.pid(), Some(first));

    notebook.terminate().await;
}

#[tokio::test]
async fn test_system_exit_is_a_cell_error() {
    let notebook = notebook();

    let result = run(&notebook, "raise SystemExit(3)").await;
    assert!(!result.success);
    assert!(result.output.contains("SystemExit"));
    assert!(notebook.has_session());

    notebook.terminate().await;
}

// =============================================================================
// Ordering and concurrency
// =============================================================================

#[tokio::test]
async fn test_cells_on_one_notebook_run_in_submission_order() {
    let notebook = notebook();
    run(&notebook, "order = []").await;

    let (first, second, third) = tokio::join!(
        run(&notebook, "import time\ntime.sleep(0.3)\norder.append('a')"),
        run(&notebook, "order.append('b')"),
        run(&notebook, "order.append('c')\nprint(order)"),
    );

    assert!(first.success && second.success);
    assert_eq!(third.output, "['a', 'b', 'c']\n");

    notebook.terminate().await;
}

#[tokio::test]
async fn test_independent_notebooks_run_concurrently() {
    let left = notebook();
    let right = notebook();
    run(&left, "pass").await;
    run(&right, "pass").await;
    assert_ne!(left.pid(), right.pid());

    let started = Instant::now();
    let (a, b) = tokio::join!(
        run(&left, "import time\ntime.sleep(1)\nname = 'left'\nprint(name)"),
        run(&right, "import time\ntime.sleep(1)\nname = 'right'\nprint(name)"),
    );

    assert_eq!(a.output, "left\n");
    assert_eq!(b.output, "right\n");
    assert!(started.elapsed() < Duration::from_millis(1900));

    left.terminate().await;
    right.terminate().await;
}
