use std::io::Write;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use serde_json::{json, Value};

#[cfg(unix)]
use rand::{distributions::Alphanumeric, Rng};
#[cfg(unix)]
use std::os::unix::net::UnixStream;

use crate::playback::PlaybackCommand;

const SOCKET_WAIT: Duration = Duration::from_millis(50);
const SOCKET_RETRIES: usize = 40;

/// Applies arbiter commands to something that actually plays video.
pub trait PlayerBackend: Send {
    fn apply(&mut self, command: &PlaybackCommand) -> Result<()>;
}

/// Applies every command, logging failures instead of surfacing them.
pub fn apply_all(player: &mut dyn PlayerBackend, commands: &[PlaybackCommand]) {
    for command in commands {
        if let Err(err) = player.apply(command) {
            tracing::debug!(?command, error = %err, "player command failed");
        }
    }
}

/// Used when playback is disabled.
pub struct NullPlayer;

impl PlayerBackend for NullPlayer {
    fn apply(&mut self, _command: &PlaybackCommand) -> Result<()> {
        Ok(())
    }
}

/// Keeps every command it receives; cloned handles share the log.
#[derive(Clone, Default)]
pub struct RecordingPlayer {
    log: Arc<Mutex<Vec<PlaybackCommand>>>,
}

impl RecordingPlayer {
    pub fn commands(&self) -> Vec<PlaybackCommand> {
        self.log.lock().clone()
    }

    pub fn clear(&self) {
        self.log.lock().clear();
    }
}

impl PlayerBackend for RecordingPlayer {
    fn apply(&mut self, command: &PlaybackCommand) -> Result<()> {
        self.log.lock().push(command.clone());
        Ok(())
    }
}

/// One long-lived `mpv` window driven over its JSON IPC socket. The process
/// starts on the first `Play`; a `Play` for a different video replaces the
/// loaded file.
pub struct MpvPlayer {
    mpv_path: String,
    child: Option<Child>,
    ipc_path: Option<String>,
    loaded: Option<String>,
}

impl MpvPlayer {
    pub fn new(mpv_path: impl Into<String>) -> Self {
        Self {
            mpv_path: mpv_path.into(),
            child: None,
            ipc_path: None,
            loaded: None,
        }
    }

    fn ensure_running(&mut self) -> Result<String> {
        if let Some(child) = self.child.as_mut() {
            match child.try_wait() {
                Ok(None) => {
                    if let Some(path) = &self.ipc_path {
                        return Ok(path.clone());
                    }
                }
                Ok(Some(status)) => {
                    tracing::debug!(code = ?status.code(), "mpv exited; restarting");
                }
                Err(err) => {
                    tracing::debug!(error = %err, "poll mpv status");
                }
            }
            self.shutdown();
        }

        let path = unique_ipc_path().ok_or_else(|| anyhow!("mpv IPC is not supported on this platform"))?;
        cleanup_ipc_path(&path);
        let args = launch_args(&path);
        tracing::debug!(mpv = %self.mpv_path, ?args, "spawning mpv");
        let child = Command::new(&self.mpv_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("launch {}", self.mpv_path))?;
        self.child = Some(child);
        self.ipc_path = Some(path.clone());
        self.loaded = None;
        wait_for_socket(&path)?;
        Ok(path)
    }

    fn shutdown(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(path) = self.ipc_path.take() {
            cleanup_ipc_path(&path);
        }
        self.loaded = None;
    }
}

impl PlayerBackend for MpvPlayer {
    fn apply(&mut self, command: &PlaybackCommand) -> Result<()> {
        let path = match command {
            PlaybackCommand::Play { .. } => self.ensure_running()?,
            _ => match &self.ipc_path {
                Some(path) => path.clone(),
                None => return Ok(()),
            },
        };
        let payloads = command_payloads(command, self.loaded.as_deref());
        for payload in &payloads {
            send_ipc_command(&path, payload)?;
        }
        if let PlaybackCommand::Play { video_id, .. } = command {
            self.loaded = Some(video_id.clone());
        }
        Ok(())
    }
}

impl Drop for MpvPlayer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn launch_args(ipc_path: &str) -> Vec<String> {
    vec![
        "--idle=yes".to_string(),
        "--force-window=yes".to_string(),
        "--keep-open=yes".to_string(),
        "--loop-file=inf".to_string(),
        "--really-quiet".to_string(),
        "--terminal=no".to_string(),
        "--ytdl=no".to_string(),
        "--title=Nagris".to_string(),
        format!("--input-ipc-server={ipc_path}"),
    ]
}

/// IPC payloads for one command. Commands aimed at a video other than the
/// loaded one are dropped, except `Play` which loads it.
fn command_payloads(command: &PlaybackCommand, loaded: Option<&str>) -> Vec<Value> {
    match command {
        PlaybackCommand::Play { video_id, src, muted } => {
            let mut payloads = Vec::with_capacity(3);
            if loaded != Some(video_id.as_str()) {
                payloads.push(json!({ "command": ["loadfile", src, "replace"] }));
            }
            payloads.push(json!({ "command": ["set_property", "mute", muted] }));
            payloads.push(json!({ "command": ["set_property", "pause", false] }));
            payloads
        }
        PlaybackCommand::Pause { video_id } if loaded == Some(video_id.as_str()) => {
            vec![json!({ "command": ["set_property", "pause", true] })]
        }
        PlaybackCommand::SetMuted { video_id, muted } if loaded == Some(video_id.as_str()) => {
            vec![json!({ "command": ["set_property", "mute", muted] })]
        }
        _ => Vec::new(),
    }
}

fn wait_for_socket(path: &str) -> Result<()> {
    for _ in 0..SOCKET_RETRIES {
        if std::path::Path::new(path).exists() {
            return Ok(());
        }
        thread::sleep(SOCKET_WAIT);
    }
    Err(anyhow!("mpv IPC socket {path} never appeared"))
}

#[cfg(unix)]
fn send_ipc_command(path: &str, payload: &Value) -> Result<()> {
    let serialized = serde_json::to_string(payload).context("serialize mpv command")?;
    let mut stream =
        UnixStream::connect(path).with_context(|| format!("connect to mpv IPC socket {path}"))?;
    stream
        .write_all(serialized.as_bytes())
        .context("write mpv IPC command")?;
    stream
        .write_all(b"\n")
        .context("write mpv IPC command terminator")?;
    Ok(())
}

#[cfg(not(unix))]
fn send_ipc_command(_path: &str, _payload: &Value) -> Result<()> {
    Err(anyhow!("mpv IPC is not supported on this platform"))
}

#[cfg(unix)]
fn unique_ipc_path() -> Option<String> {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    let mut path = std::env::temp_dir();
    path.push(format!("nagris-mpv-{}-{suffix}.sock", std::process::id()));
    Some(path.to_string_lossy().to_string())
}

#[cfg(not(unix))]
fn unique_ipc_path() -> Option<String> {
    None
}

fn cleanup_ipc_path(path: &str) {
    if let Err(err) = std::fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!(path, error = %err, "remove mpv ipc path");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn play(id: &str, muted: bool) -> PlaybackCommand {
        PlaybackCommand::Play {
            video_id: id.into(),
            src: format!("https://cdn.test/{id}.mp4"),
            muted,
        }
    }

    #[test]
    fn play_loads_only_when_switching_videos() {
        let first = command_payloads(&play("v1", true), None);
        assert_eq!(first.len(), 3);
        assert_eq!(first[0]["command"][0], "loadfile");
        assert_eq!(first[0]["command"][1], "https://cdn.test/v1.mp4");

        let resume = command_payloads(&play("v1", false), Some("v1"));
        assert_eq!(resume.len(), 2);
        assert_eq!(resume[0]["command"][2], false);
    }

    #[test]
    fn commands_for_unloaded_videos_are_dropped() {
        let pause = PlaybackCommand::Pause { video_id: "v2".into() };
        assert!(command_payloads(&pause, Some("v1")).is_empty());
        assert_eq!(command_payloads(&pause, Some("v2")).len(), 1);
        let mute = PlaybackCommand::SetMuted { video_id: "v1".into(), muted: true };
        assert!(command_payloads(&mute, None).is_empty());
    }

    #[test]
    fn launch_args_point_at_socket() {
        let args = launch_args("/tmp/x.sock");
        assert!(args.contains(&"--input-ipc-server=/tmp/x.sock".to_string()));
        assert!(args.contains(&"--idle=yes".to_string()));
    }

    struct Broken;

    impl PlayerBackend for Broken {
        fn apply(&mut self, _command: &PlaybackCommand) -> Result<()> {
            Err(anyhow!("no player"))
        }
    }

    #[test]
    fn apply_all_swallows_failures() {
        apply_all(&mut Broken, &[play("v1", true)]);
        let mut recorder = RecordingPlayer::default();
        let handle = recorder.clone();
        apply_all(&mut recorder, &[play("v1", true), play("v2", false)]);
        assert_eq!(handle.commands().len(), 2);
    }

    #[test]
    fn idle_mpv_ignores_pause() {
        let mut player = MpvPlayer::new("mpv-binary-that-does-not-exist");
        assert!(player
            .apply(&PlaybackCommand::Pause { video_id: "v1".into() })
            .is_ok());
        assert!(player.apply(&play("v1", true)).is_err());
    }
}
