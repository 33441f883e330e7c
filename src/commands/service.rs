//! Engine service daemon
//!
//! The daemon owns the worker pools. It runs the recovery sweep once at
//! startup, then serves line-delimited JSON requests on a Unix socket.
//!
//! Usage:
//!   anno service start [--workers N] [--socket P]   # Fork the daemon
//!   anno service stop [--force]                     # Stop the daemon
//!   anno service status                             # Show daemon state
//!
//! Bookkeeping lives in `<WORKFOLDER>/.service/`: `state.json`, the default
//! socket `engine.sock` and the daemon's `daemon.log`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};

use anno_engine::config::Config;
use anno_engine::engine::Engine;
use anno_engine::service::{Lane, is_process_running};
use anno_engine::store::NewTask;
use anno_engine::{TargetData, TaskInput};

/// Default socket path
pub fn default_socket_path(config: &Config) -> PathBuf {
    config.service_dir().join("engine.sock")
}

/// Path to the service state file
pub fn state_file_path(config: &Config) -> PathBuf {
    config.service_dir().join("state.json")
}

/// Where the forked daemon writes its output
pub fn log_file_path(config: &Config) -> PathBuf {
    config.service_dir().join("daemon.log")
}

/// Service state stored on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceState {
    pub pid: u32,
    pub socket_path: String,
    pub started_at: String,
    pub workers: usize,
}

impl ServiceState {
    pub fn load(config: &Config) -> Result<Option<Self>> {
        let path = state_file_path(config);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read service state from {:?}", path))?;
        let state: ServiceState = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse service state from {:?}", path))?;
        Ok(Some(state))
    }

    pub fn save(&self, config: &Config) -> Result<()> {
        let service_dir = config.service_dir();
        fs::create_dir_all(&service_dir)
            .with_context(|| format!("Failed to create service directory at {:?}", service_dir))?;
        let path = state_file_path(config);
        let content = serde_json::to_string_pretty(self).context("Failed to serialize service state")?;
        fs::write(&path, content).with_context(|| format!("Failed to write service state to {:?}", path))?;
        Ok(())
    }

    pub fn remove(config: &Config) -> Result<()> {
        let path = state_file_path(config);
        if path.exists() {
            fs::remove_file(&path).with_context(|| format!("Failed to remove service state at {:?}", path))?;
        }
        Ok(())
    }
}

/// IPC Request types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum IpcRequest {
    /// Create a task and queue it
    Submit {
        /// Raw submission, classified by the daemon
        #[serde(default)]
        input: Option<String>,
        /// Existing VCF file used instead of `input`
        #[serde(default)]
        vcf_file: Option<PathBuf>,
        #[serde(default)]
        regions: Option<String>,
        #[serde(default)]
        target: Option<String>,
        #[serde(default)]
        variables: BTreeMap<String, String>,
        /// `key -> (file name, content)`
        #[serde(default)]
        files: BTreeMap<String, (String, String)>,
        #[serde(default)]
        convert_only: bool,
        /// Answer only once the run is over
        #[serde(default)]
        wait: bool,
    },
    /// Restart an existing task
    Restart {
        id: String,
        #[serde(default)]
        priority: bool,
    },
    /// Get service status
    Status,
    /// Shutdown the service
    Shutdown,
}

impl IpcRequest {
    /// Whether the daemon may hold the response until a run completes
    fn blocks(&self) -> bool {
        matches!(self, IpcRequest::Submit { wait: true, .. })
    }
}

/// IPC Response types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub data: Option<serde_json::Value>,
}

impl IpcResponse {
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            error: None,
            data: Some(data),
        }
    }

    pub fn error(msg: &str) -> Self {
        Self {
            ok: false,
            error: Some(msg.to_string()),
            data: None,
        }
    }

    /// Turn an error response into an `Err`
    pub fn into_result(self) -> Result<serde_json::Value> {
        if self.ok {
            Ok(self.data.unwrap_or(serde_json::Value::Null))
        } else {
            anyhow::bail!("{}", self.error.unwrap_or_else(|| "Unknown service error".to_string()))
        }
    }
}

/// Start the service daemon
#[cfg(unix)]
pub fn run_start(config: &Config, socket_path: Option<&Path>, workers: Option<usize>, json: bool) -> Result<()> {
    // Check if service is already running
    if let Some(state) = ServiceState::load(config)? {
        if is_process_running(state.pid) {
            if json {
                let output = serde_json::json!({
                    "error": "Service already running",
                    "pid": state.pid,
                    "socket": state.socket_path,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("Service already running (PID {})", state.pid);
                println!("Socket: {}", state.socket_path);
            }
            return Ok(());
        }
        // Stale state, clean up
        ServiceState::remove(config)?;
    }

    let socket = socket_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_socket_path(config));

    // Remove stale socket file if exists
    if socket.exists() {
        fs::remove_file(&socket).with_context(|| format!("Failed to remove stale socket at {:?}", socket))?;
    }

    let current_exe = std::env::current_exe().context("Failed to get current executable path")?;
    let socket_str = socket.to_string_lossy().to_string();

    let mut args = vec![
        "--dir".to_string(),
        config.work_folder.to_string_lossy().to_string(),
        "service".to_string(),
        "daemon".to_string(),
        "--socket".to_string(),
        socket_str.clone(),
    ];
    if let Some(n) = workers {
        args.push("--workers".to_string());
        args.push(n.to_string());
    }

    fs::create_dir_all(config.service_dir())
        .with_context(|| format!("Failed to create service directory at {:?}", config.service_dir()))?;
    let log_path = log_file_path(config);
    let log = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open daemon log at {:?}", log_path))?;
    let log_err = log.try_clone().context("Failed to clone daemon log handle")?;

    let child = process::Command::new(&current_exe)
        .args(&args)
        .stdin(process::Stdio::null())
        .stdout(process::Stdio::from(log))
        .stderr(process::Stdio::from(log_err))
        .spawn()
        .context("Failed to spawn daemon process")?;

    let pid = child.id();
    let eff_workers = workers.unwrap_or(config.scheduler.normal_workers);

    let state = ServiceState {
        pid,
        socket_path: socket_str.clone(),
        started_at: chrono::Utc::now().to_rfc3339(),
        workers: eff_workers,
    };
    state.save(config)?;

    // Wait a moment for the daemon to start
    thread::sleep(Duration::from_millis(200));

    if !is_process_running(pid) {
        ServiceState::remove(config)?;
        anyhow::bail!("Daemon process exited immediately. Check {:?}", log_path);
    }

    if json {
        let output = serde_json::json!({
            "status": "started",
            "pid": pid,
            "socket": socket_str,
            "workers": eff_workers,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Service started (PID {})", pid);
        println!("Socket: {}", socket_str);
        println!("Workers: {} normal, 1 priority", eff_workers);
    }

    Ok(())
}

#[cfg(not(unix))]
pub fn run_start(_config: &Config, _socket_path: Option<&Path>, _workers: Option<usize>, _json: bool) -> Result<()> {
    anyhow::bail!("Service daemon is only supported on Unix systems")
}

/// Run the daemon in the foreground (called by the forked process)
#[cfg(unix)]
pub fn run_daemon(config: &Config, socket_path: Option<&Path>, workers: Option<usize>) -> Result<()> {
    let mut config = config.clone();
    if let Some(n) = workers {
        anyhow::ensure!(n > 0, "--workers must be at least 1");
        config.scheduler.normal_workers = n;
    }

    let socket = socket_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_socket_path(&config));

    if let Some(parent) = socket.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create socket directory {:?}", parent))?;
    }
    if socket.exists() {
        fs::remove_file(&socket)?;
    }

    info!(
        work_folder = %config.work_folder.display(),
        workers = config.scheduler.normal_workers,
        "Starting engine service"
    );
    let engine = Engine::new(&config);

    let report = engine.recover().context("Recovery sweep failed")?;
    if !report.is_clean() {
        warn!(failed = report.failed.len(), "Some tasks could not be recovered");
    }

    let listener =
        UnixListener::bind(&socket).with_context(|| format!("Failed to bind to socket {:?}", socket))?;
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&socket, fs::Permissions::from_mode(0o600))?;
    }
    // Non-blocking so a shutdown request ends the loop promptly
    listener.set_nonblocking(true)?;

    // A foreground daemon has no state file from `service start`
    if ServiceState::load(&config)?.is_none_or(|s| s.pid != process::id()) {
        ServiceState {
            pid: process::id(),
            socket_path: socket.to_string_lossy().to_string(),
            started_at: chrono::Utc::now().to_rfc3339(),
            workers: config.scheduler.normal_workers,
        }
        .save(&config)?;
    }

    info!(socket = %socket.display(), "Listening");
    let running = Arc::new(AtomicBool::new(true));

    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                let engine = engine.clone();
                let config = config.clone();
                let running = Arc::clone(&running);
                let spawned = thread::Builder::new().name("ipc".to_string()).spawn(move || {
                    if let Err(e) = handle_connection(&engine, &config, stream, &running) {
                        warn!(error = %e, "Error handling connection");
                    }
                });
                if let Err(e) = spawned {
                    error!(error = %e, "Failed to spawn connection handler");
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(100));
            }
            Err(e) => {
                warn!(error = %e, "Accept error");
            }
        }
    }

    // Runs still in flight are left to the next daemon's recovery sweep
    info!("Service shutting down");
    let _ = fs::remove_file(&socket);
    ServiceState::remove(&config)?;

    Ok(())
}

#[cfg(not(unix))]
pub fn run_daemon(_config: &Config, _socket_path: Option<&Path>, _workers: Option<usize>) -> Result<()> {
    anyhow::bail!("Daemon is only supported on Unix systems")
}

/// Handle a single IPC connection
#[cfg(unix)]
fn handle_connection(engine: &Engine, config: &Config, stream: UnixStream, running: &AtomicBool) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    stream.set_write_timeout(Some(Duration::from_secs(5)))?;

    let mut write_stream = stream.try_clone().context("Failed to clone stream for writing")?;
    let reader = BufReader::new(stream);

    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                let response = IpcResponse::error(&format!("Read error: {}", e));
                let _ = write_response(&mut write_stream, &response);
                return Ok(());
            }
        };

        if line.is_empty() {
            continue;
        }

        let request: IpcRequest = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                let response = IpcResponse::error(&format!("Invalid request: {}", e));
                write_response(&mut write_stream, &response)?;
                continue;
            }
        };

        let response = handle_request(engine, config, request, running);
        write_response(&mut write_stream, &response)?;

        if !running.load(Ordering::SeqCst) {
            break;
        }
    }

    Ok(())
}

#[cfg(unix)]
fn write_response(stream: &mut UnixStream, response: &IpcResponse) -> Result<()> {
    let json = serde_json::to_string(response)?;
    writeln!(stream, "{}", json)?;
    stream.flush()?;
    Ok(())
}

/// Handle an IPC request
fn handle_request(engine: &Engine, config: &Config, request: IpcRequest, running: &AtomicBool) -> IpcResponse {
    match request {
        IpcRequest::Submit {
            input,
            vcf_file,
            regions,
            target,
            variables,
            files,
            convert_only,
            wait,
        } => {
            let input = match (vcf_file, input) {
                (Some(path), _) => Ok(TaskInput::VcfFile(path)),
                (None, Some(raw)) => TaskInput::detect(&raw),
                (None, None) => return IpcResponse::error("Submit needs input or vcf_file"),
            };
            let new = input.map(|input| NewTask {
                input,
                regions,
                target,
                target_data: TargetData { variables, files },
                convert_only,
            });
            match new {
                Ok(new) => handle_submit(engine, &new, wait),
                Err(e) => IpcResponse::error(&e.to_string()),
            }
        }
        IpcRequest::Restart { id, priority } => match engine.restart(&id, priority) {
            Ok(lane) => IpcResponse::success(serde_json::json!({
                "id": id,
                "priority": priority,
                "lane": lane,
            })),
            Err(e) => IpcResponse::error(&e.to_string()),
        },
        IpcRequest::Status => handle_status(engine, config),
        IpcRequest::Shutdown => {
            running.store(false, Ordering::SeqCst);
            IpcResponse::success(serde_json::json!({ "status": "shutting_down" }))
        }
    }
}

fn handle_submit(engine: &Engine, new: &NewTask, wait: bool) -> IpcResponse {
    let (id, priority) = match engine.create_task(new) {
        Ok(created) => created,
        Err(e) => return IpcResponse::error(&e.to_string()),
    };
    let lane = match engine.queue(&id, priority, wait) {
        Ok(lane) => lane,
        Err(e) => return IpcResponse::error(&e.to_string()),
    };

    let mut data = serde_json::json!({
        "id": id,
        "priority": priority,
        "lane": lane,
    });
    if wait {
        if let Ok(state) = engine.store().state(&id) {
            data["state"] = serde_json::json!(state);
        }
    }
    IpcResponse::success(data)
}

fn handle_status(engine: &Engine, config: &Config) -> IpcResponse {
    let state = match ServiceState::load(config) {
        Ok(Some(s)) => s,
        Ok(None) => return IpcResponse::error("No service state found"),
        Err(e) => return IpcResponse::error(&e.to_string()),
    };
    let active = engine.store().list_active().map(|ids| ids.len()).unwrap_or(0);

    IpcResponse::success(serde_json::json!({
        "status": "running",
        "pid": state.pid,
        "socket": state.socket_path,
        "started_at": state.started_at,
        "active_tasks": active,
        "lanes": {
            "normal": engine.scheduler().load(Lane::Normal),
            "priority": engine.scheduler().load(Lane::Priority),
        },
    }))
}

/// Stop the service daemon
#[cfg(unix)]
pub fn run_stop(config: &Config, force: bool, json: bool) -> Result<()> {
    let state = match ServiceState::load(config)? {
        Some(s) => s,
        None => {
            if json {
                let output = serde_json::json!({ "error": "Service not running" });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("Service not running");
            }
            return Ok(());
        }
    };

    let socket = PathBuf::from(&state.socket_path);
    if !force && socket.exists() {
        if let Err(e) = send_request(config, &IpcRequest::Shutdown) {
            warn!(error = %e, "Shutdown request failed");
        }
        wait_for_exit(state.pid, Duration::from_secs(2));
    }

    // If process is still running, kill it
    if is_process_running(state.pid) {
        if force {
            kill_process_force(state.pid)?;
        } else {
            kill_process_graceful(state.pid)?;
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    ServiceState::remove(config)?;

    if json {
        let output = serde_json::json!({
            "status": "stopped",
            "pid": state.pid,
            "force": force,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Service stopped (PID {})", state.pid);
    }

    Ok(())
}

#[cfg(not(unix))]
pub fn run_stop(_config: &Config, _force: bool, _json: bool) -> Result<()> {
    anyhow::bail!("Service daemon is only supported on Unix systems")
}

/// Show service status
pub fn run_status(config: &Config, json: bool) -> Result<()> {
    let state = match ServiceState::load(config)? {
        Some(s) => s,
        None => {
            if json {
                let output = serde_json::json!({ "status": "not_running" });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("Service: not running");
            }
            return Ok(());
        }
    };

    if !is_process_running(state.pid) {
        ServiceState::remove(config)?;
        if json {
            let output = serde_json::json!({
                "status": "not_running",
                "note": "Cleaned up stale state",
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            println!("Service: not running (cleaned up stale state)");
        }
        return Ok(());
    }

    let uptime = chrono::DateTime::parse_from_rfc3339(&state.started_at)
        .map(|started| {
            let duration = chrono::Utc::now().signed_duration_since(started);
            format_duration(duration.num_seconds())
        })
        .unwrap_or_else(|_| "unknown".to_string());

    // Live numbers are best effort; the daemon may be busy starting up
    let live = send_request(config, &IpcRequest::Status)
        .ok()
        .and_then(|r| r.into_result().ok());

    if json {
        let mut output = serde_json::json!({
            "status": "running",
            "pid": state.pid,
            "socket": state.socket_path,
            "started_at": state.started_at,
            "uptime": uptime,
            "workers": state.workers,
        });
        if let Some(live) = live {
            output["active_tasks"] = live["active_tasks"].clone();
            output["lanes"] = live["lanes"].clone();
        }
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Service: running (PID {})", state.pid);
        println!("Socket: {}", state.socket_path);
        println!("Uptime: {}", uptime);
        println!("Workers: {} normal, 1 priority", state.workers);
        if let Some(live) = live {
            println!("Active tasks: {}", live["active_tasks"]);
            for lane in ["normal", "priority"] {
                let load = &live["lanes"][lane];
                println!("  {}: {}/{} outstanding", lane, load["outstanding"], load["width"]);
            }
        }
    }

    Ok(())
}

/// Format a duration in seconds to human-readable string
fn format_duration(secs: i64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        format!("{}h {}m", hours, mins)
    } else {
        let days = secs / 86400;
        let hours = (secs % 86400) / 3600;
        format!("{}d {}h", days, hours)
    }
}

fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if !is_process_running(pid) {
            return true;
        }
        thread::sleep(Duration::from_millis(100));
    }
    !is_process_running(pid)
}

/// Send SIGTERM, wait, then SIGKILL
#[cfg(unix)]
fn kill_process_graceful(pid: u32) -> Result<()> {
    let pid_i32 = pid as i32;

    if unsafe { libc::kill(pid_i32, libc::SIGTERM) } != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        return Err(err).context(format!("Failed to send SIGTERM to PID {}", pid));
    }

    if wait_for_exit(pid, Duration::from_secs(5)) {
        return Ok(());
    }

    kill_process_force(pid)
}

/// Send SIGKILL immediately
#[cfg(unix)]
fn kill_process_force(pid: u32) -> Result<()> {
    if unsafe { libc::kill(pid as i32, libc::SIGKILL) } != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        return Err(err).context(format!("Failed to send SIGKILL to PID {}", pid));
    }
    Ok(())
}

/// Send an IPC request to the running service
#[cfg(unix)]
pub fn send_request(config: &Config, request: &IpcRequest) -> Result<IpcResponse> {
    let state = ServiceState::load(config)?.ok_or_else(|| anyhow::anyhow!("Service not running"))?;

    let socket = PathBuf::from(&state.socket_path);
    let mut stream =
        UnixStream::connect(&socket).with_context(|| format!("Failed to connect to service at {:?}", socket))?;

    let read_timeout = if request.blocks() { None } else { Some(Duration::from_secs(30)) };
    stream.set_read_timeout(read_timeout)?;
    stream.set_write_timeout(Some(Duration::from_secs(5)))?;

    let json = serde_json::to_string(request)?;
    writeln!(stream, "{}", json)?;
    stream.flush()?;

    let reader = BufReader::new(&stream);
    for line in reader.lines() {
        let line = line.context("Failed to read response")?;
        if !line.is_empty() {
            let response: IpcResponse = serde_json::from_str(&line).context("Failed to parse response")?;
            return Ok(response);
        }
    }

    anyhow::bail!("No response from service")
}

#[cfg(not(unix))]
pub fn send_request(_config: &Config, _request: &IpcRequest) -> Result<IpcResponse> {
    anyhow::bail!("IPC is only supported on Unix systems")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_service_paths() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::new(temp_dir.path());
        assert_eq!(default_socket_path(&config), temp_dir.path().join(".service/engine.sock"));
        assert_eq!(log_file_path(&config), temp_dir.path().join(".service/daemon.log"));
    }

    #[test]
    fn test_service_state_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::new(temp_dir.path());

        let state = ServiceState {
            pid: 12345,
            socket_path: "/tmp/test.sock".to_string(),
            started_at: chrono::Utc::now().to_rfc3339(),
            workers: 2,
        };
        state.save(&config).unwrap();

        let loaded = ServiceState::load(&config).unwrap().unwrap();
        assert_eq!(loaded.pid, 12345);
        assert_eq!(loaded.workers, 2);

        ServiceState::remove(&config).unwrap();
        assert!(ServiceState::load(&config).unwrap().is_none());
    }

    #[test]
    fn test_ipc_submit_serialization() {
        let mut files = BTreeMap::new();
        files.insert("panel.bed".to_string(), ("panel.bed".to_string(), "1\t0\t10\n".to_string()));
        let req = IpcRequest::Submit {
            input: Some("NM_000059.3:c.2378A>T".to_string()),
            vcf_file: None,
            regions: None,
            target: Some("demo".to_string()),
            variables: BTreeMap::new(),
            files,
            convert_only: false,
            wait: true,
        };
        assert!(req.blocks());
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"cmd\":\"submit\""));

        let parsed: IpcRequest = serde_json::from_str(&json).unwrap();
        match parsed {
            IpcRequest::Submit { target, files, wait, .. } => {
                assert_eq!(target.as_deref(), Some("demo"));
                assert_eq!(files["panel.bed"].0, "panel.bed");
                assert!(wait);
            }
            _ => panic!("Wrong request type"),
        }
    }

    #[test]
    fn test_ipc_minimal_requests() {
        let parsed: IpcRequest = serde_json::from_str(r#"{"cmd":"submit","input":"x"}"#).unwrap();
        assert!(!parsed.blocks());
        let parsed: IpcRequest = serde_json::from_str(r#"{"cmd":"restart","id":"123"}"#).unwrap();
        assert!(matches!(parsed, IpcRequest::Restart { priority: false, .. }));
        let parsed: IpcRequest = serde_json::from_str(r#"{"cmd":"shutdown"}"#).unwrap();
        assert!(matches!(parsed, IpcRequest::Shutdown));
    }

    #[test]
    fn test_ipc_response() {
        let resp = IpcResponse::success(serde_json::json!({"id": "1"}));
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"ok":true,"id":"1"}"#);
        assert_eq!(resp.into_result().unwrap()["id"], "1");

        let resp = IpcResponse::error("Something went wrong");
        assert!(!resp.ok);
        assert_eq!(resp.into_result().unwrap_err().to_string(), "Something went wrong");
    }

    #[test]
    fn test_handle_submit_and_restart() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::new(temp_dir.path());
        config.pipeline.annotate_command = "true".to_string();
        config.pipeline.verbose = false;
        let engine = Engine::new(&config);
        let running = AtomicBool::new(true);

        let submit = IpcRequest::Submit {
            input: Some("13-32532632-A-G (het)".to_string()),
            vcf_file: None,
            regions: None,
            target: None,
            variables: BTreeMap::new(),
            files: BTreeMap::new(),
            convert_only: false,
            wait: true,
        };
        let data = handle_request(&engine, &config, submit, &running).into_result().unwrap();
        assert_eq!(data["priority"], true);
        assert_eq!(data["state"], "success");

        let id = data["id"].as_str().unwrap().to_string();
        let restart = IpcRequest::Restart { id: id.clone(), priority: false };
        let data = handle_request(&engine, &config, restart, &running).into_result().unwrap();
        assert_eq!(data["id"], id.as_str());
        engine.wait_for_task(&id).unwrap();
    }

    #[test]
    fn test_handle_invalid_submit() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::new(temp_dir.path());
        let engine = Engine::new(&config);
        let running = AtomicBool::new(true);

        let submit = IpcRequest::Submit {
            input: Some("not a variant".to_string()),
            vcf_file: None,
            regions: None,
            target: None,
            variables: BTreeMap::new(),
            files: BTreeMap::new(),
            convert_only: false,
            wait: false,
        };
        let resp = handle_request(&engine, &config, submit, &running);
        assert!(!resp.ok);
        assert!(resp.error.unwrap().contains("Unable to determine input type"));

        let resp = handle_request(&engine, &config, IpcRequest::Shutdown, &running);
        assert!(resp.ok);
        assert!(!running.load(Ordering::SeqCst));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30), "30s");
        assert_eq!(format_duration(90), "1m 30s");
        assert_eq!(format_duration(3661), "1h 1m");
        assert_eq!(format_duration(90000), "1d 1h");
    }

    #[test]
    fn test_status_not_running() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::new(temp_dir.path());
        assert!(run_status(&config, false).is_ok());
    }
}
