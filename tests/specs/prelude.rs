//! Test helpers for behavioral specifications.
//!
//! Provides a harness that runs the real daemon against a throwaway
//! MAB_HOME, a raw length-prefixed socket client, and stub agent
//! scripts that heartbeat like real workers.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, dead_code)]

use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use serde_json::{json, Value};

// Aggressive timings so specs run fast. The health monitor ticks every
// 100ms and silent workers are failed after 3s instead of 30s.
const HEALTH_TICK_MS: &str = "100";
const STARTUP_TIMEOUT_SECS: &str = "3";

pub const SPEC_POLL_INTERVAL: Duration = Duration::from_millis(25);
pub const SPEC_WAIT_MAX: Duration = Duration::from_secs(5);

/// Returns the path to a binary built by this workspace.
/// Falls back to resolving relative to the test binary itself when
/// CARGO_MANIFEST_DIR is stale (e.g. a shared target directory).
fn binary_path(name: &str) -> PathBuf {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));

    let standard = manifest_dir.join("target/debug").join(name);
    if standard.exists() {
        return standard;
    }

    // The test binary lives at target/debug/deps/specs-<hash>, so its
    // grandparent is target/debug/ where mab and mabd are built.
    if let Ok(exe) = std::env::current_exe() {
        if let Some(debug_dir) = exe.parent().and_then(|d| d.parent()) {
            let fallback = debug_dir.join(name);
            if fallback.exists() {
                return fallback;
            }
        }
    }

    standard
}

pub fn mabd_binary() -> PathBuf {
    binary_path("mabd")
}

pub fn mab_binary() -> PathBuf {
    binary_path("mab")
}

/// A stub agent behavior for the harness config.
pub enum StubAgent {
    /// Touches its heartbeat file every 200ms; exits on SIGTERM.
    Heartbeat,
    /// Heartbeats but ignores SIGTERM, forcing escalation.
    IgnoresTerm,
    /// Never heartbeats; just sleeps.
    Silent,
}

impl StubAgent {
    fn script(&self) -> &'static str {
        match self {
            StubAgent::Heartbeat => {
                "#!/bin/sh\n\
                 hb=\"$MAB_TOWN_PATH/.mab/heartbeat/$MAB_WORKER_ID\"\n\
                 while true; do touch \"$hb\"; sleep 0.2; done\n"
            }
            StubAgent::IgnoresTerm => {
                "#!/bin/sh\n\
                 trap '' TERM\n\
                 hb=\"$MAB_TOWN_PATH/.mab/heartbeat/$MAB_WORKER_ID\"\n\
                 while true; do touch \"$hb\"; sleep 0.2; done\n"
            }
            StubAgent::Silent => "#!/bin/sh\nsleep 600\n",
        }
    }
}

/// One running daemon against a throwaway MAB_HOME.
pub struct TestDaemon {
    home: tempfile::TempDir,
    town: tempfile::TempDir,
    child: Option<Child>,
}

impl TestDaemon {
    /// Start a daemon whose agents run the given stub, with extra YAML
    /// appended to the global config document.
    pub fn start_with(agent: StubAgent, extra_config: &str) -> Self {
        let home = tempfile::tempdir().unwrap();
        let town = tempfile::tempdir().unwrap();

        let agent_path = home.path().join("agent-stub.sh");
        std::fs::write(&agent_path, agent.script()).unwrap();
        let mut perms = std::fs::metadata(&agent_path).unwrap().permissions();
        use std::os::unix::fs::PermissionsExt;
        perms.set_mode(0o755);
        std::fs::set_permissions(&agent_path, perms).unwrap();

        std::fs::write(
            home.path().join("config.yaml"),
            format!(
                "agent:\n  program: \"{}\"\nhealth_check:\n  interval_seconds: 1\n  heartbeat_timeout_seconds: 1\n  unhealthy_threshold: 2\n{extra_config}",
                agent_path.display()
            ),
        )
        .unwrap();

        let mut daemon = Self {
            home,
            town,
            child: None,
        };
        daemon.launch();
        daemon
    }

    pub fn start() -> Self {
        Self::start_with(StubAgent::Heartbeat, "")
    }

    /// Launch (or relaunch) the daemon process and wait for READY.
    pub fn launch(&mut self) {
        let mut child = self
            .daemon_command()
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("failed to spawn mabd");

        let stdout = child.stdout.take().unwrap();
        let mut became_ready = false;
        for line in BufReader::new(stdout).lines() {
            let line = line.unwrap_or_default();
            if line.trim() == "READY" {
                became_ready = true;
                break;
            }
        }
        assert!(became_ready, "daemon exited before READY");
        self.child = Some(child);
    }

    /// A Command for the daemon binary with this harness environment.
    pub fn daemon_command(&self) -> Command {
        let mut cmd = Command::new(mabd_binary());
        self.apply_env(&mut cmd);
        cmd
    }

    /// A Command for the CLI binary with this harness environment.
    pub fn cli_command(&self) -> Command {
        let mut cmd = Command::new(mab_binary());
        self.apply_env(&mut cmd);
        cmd.env("MAB_DAEMON_BIN", mabd_binary());
        cmd
    }

    fn apply_env(&self, cmd: &mut Command) {
        cmd.env("MAB_HOME", self.home.path())
            .env("MAB_HEALTH_TICK_MS", HEALTH_TICK_MS)
            .env("MAB_STARTUP_TIMEOUT_SECS", STARTUP_TIMEOUT_SECS);
    }

    pub fn home(&self) -> &Path {
        self.home.path()
    }

    pub fn town_path(&self) -> String {
        self.town.path().display().to_string()
    }

    pub fn socket_path(&self) -> PathBuf {
        self.home.path().join("mab.sock")
    }

    /// Send one RPC and return the full response envelope.
    pub fn rpc(&self, method: &str, params: Value) -> Value {
        let mut stream = UnixStream::connect(self.socket_path()).expect("daemon socket");
        // Generous: a graceful stop RPC legitimately waits out its grace
        // period before answering.
        stream
            .set_read_timeout(Some(Duration::from_secs(60)))
            .unwrap();
        let request = json!({ "id": "spec-1", "method": method, "params": params });
        write_frame(&mut stream, &serde_json::to_vec(&request).unwrap());
        let frame = read_frame(&mut stream);
        serde_json::from_slice(&frame).expect("response is JSON")
    }

    /// Send one RPC and unwrap its result, panicking on error.
    pub fn call(&self, method: &str, params: Value) -> Value {
        let response = self.rpc(method, params);
        assert!(
            response["error"].is_null(),
            "{method} failed: {}",
            response["error"]
        );
        response["result"].clone()
    }

    /// Send one RPC and unwrap its error code.
    pub fn call_err(&self, method: &str, params: Value) -> i64 {
        let response = self.rpc(method, params);
        assert!(
            response["result"].is_null(),
            "{method} unexpectedly succeeded: {}",
            response["result"]
        );
        response["error"]["code"].as_i64().expect("error code")
    }

    /// Spawn a worker into the harness town and return (worker_id, pid).
    pub fn spawn_worker(&self, role: &str) -> (String, u32) {
        let result = self.call(
            "worker.spawn",
            json!({ "role": role, "town": self.town_path() }),
        );
        (
            result["worker_id"].as_str().unwrap().to_string(),
            result["pid"].as_u64().unwrap() as u32,
        )
    }

    pub fn worker_status(&self, worker_id: &str) -> String {
        let result = self.call("worker.get", json!({ "worker_id": worker_id }));
        result["worker"]["status"].as_str().unwrap().to_string()
    }

    /// Poll until the worker reaches the given status.
    pub fn wait_for_status(&self, worker_id: &str, status: &str) {
        wait_until(&format!("{worker_id} to become {status}"), || {
            self.worker_status(worker_id) == status
        });
    }

    /// Kill the daemon without any shutdown courtesy (simulated crash).
    pub fn kill_daemon(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    /// Whether the daemon process has exited.
    pub fn daemon_exited(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(Some(_))),
            None => true,
        }
    }
}

impl Drop for TestDaemon {
    fn drop(&mut self) {
        // Force shutdown kills stub workers in the drain; fall back to
        // killing the daemon process itself.
        if self.child.is_some() && self.socket_path().exists() {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                self.rpc("daemon.shutdown", json!({ "graceful": false }));
            }));
            let deadline = Instant::now() + Duration::from_secs(2);
            while Instant::now() < deadline {
                if self.daemon_exited() {
                    break;
                }
                std::thread::sleep(SPEC_POLL_INTERVAL);
            }
        }
        self.kill_daemon();
    }
}

/// Kill an arbitrary pid with SIGKILL (stub worker cleanup).
pub fn kill_pid(pid: u32) {
    let _ = Command::new("kill")
        .args(["-9", &pid.to_string()])
        .status();
}

pub fn pid_alive(pid: u32) -> bool {
    Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Poll until the condition holds, panicking after SPEC_WAIT_MAX.
pub fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + SPEC_WAIT_MAX;
    while Instant::now() < deadline {
        if condition() {
            return;
        }
        std::thread::sleep(SPEC_POLL_INTERVAL);
    }
    panic!("timed out waiting for {what}");
}

fn write_frame(stream: &mut UnixStream, payload: &[u8]) {
    stream
        .write_all(&(payload.len() as u32).to_be_bytes())
        .unwrap();
    stream.write_all(payload).unwrap();
    stream.flush().unwrap();
}

fn read_frame(stream: &mut UnixStream) -> Vec<u8> {
    let mut len = [0u8; 4];
    stream.read_exact(&mut len).expect("frame length");
    let mut buf = vec![0u8; u32::from_be_bytes(len) as usize];
    stream.read_exact(&mut buf).expect("frame payload");
    buf
}
