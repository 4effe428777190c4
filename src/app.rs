use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api;
use crate::config;
use crate::controller::{Controller, Settings};
use crate::data::{MockService, Services};
use crate::logging;
use crate::player::{MpvPlayer, NullPlayer, PlayerBackend};
use crate::session;
use crate::ui;

/// Startup options parsed from the command line.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config_file: Option<PathBuf>,
    /// Serve bundled sample data instead of talking to the backend.
    pub offline: bool,
}

pub fn run(opts: RunOptions) -> Result<()> {
    let cfg = config::load(config::LoadOptions {
        config_file: opts.config_file.clone(),
        env_prefix: None,
    })
    .context("load config")?;
    let _log_guard = logging::init(&cfg.log).context("init logging")?;
    let display_path = friendly_path(opts.config_file.as_ref().or(config::default_path().as_ref()));
    tracing::info!(config = %display_path, offline = opts.offline, "starting");

    let (services, session) = if opts.offline {
        let session = Arc::new(session::Manager::new(Some("offline".to_string())));
        (Services::mock(Arc::new(MockService::sample())), session)
    } else {
        let session = Arc::new(session::Manager::new(cfg.api.token.clone()));
        let client = api::Client::new(
            session.clone(),
            api::ClientConfig {
                user_agent: cfg.api.user_agent.clone(),
                base_url: Some(cfg.api.base_url.clone()),
                timeout: Some(cfg.api.timeout),
                http_client: None,
            },
        )
        .context("create API client")?;
        (Services::from_client(Arc::new(client)), session)
    };

    let status = match session.resume(&*services.accounts) {
        Ok(Some(user)) => format!("Signed in as @{}.", user.username),
        Ok(None) => "Browsing as a guest. Press ? for keys.".to_string(),
        Err(err) => {
            tracing::warn!(error = %format!("{err:#}"), "resume session failed");
            "Sign-in token rejected; browsing as a guest.".to_string()
        }
    };

    let player: Box<dyn PlayerBackend> = if cfg.playback.enabled {
        Box::new(MpvPlayer::new(cfg.playback.player_command.clone()))
    } else {
        Box::new(NullPlayer)
    };

    let controller = Controller::new(services, session, player, Settings::from_config(&cfg));
    let mut model = ui::Model::new(ui::Options {
        status_message: status,
        controller,
    });
    let result = model.run();
    drop(model);
    tracing::info!("exiting");
    result
}

fn friendly_path(path: Option<&PathBuf>) -> String {
    if let Some(path) = path {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix(&home) {
                let mut display = String::from("~");
                if !stripped.as_os_str().is_empty() {
                    display.push_str(&format!("/{}", stripped.display()));
                }
                return display;
            }
        }
        path.display().to_string()
    } else {
        "~/.config/nagris/config.yaml".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn home_paths_are_abbreviated() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        let path = home.join(".config/nagris/config.yaml");
        assert_eq!(friendly_path(Some(&path)), "~/.config/nagris/config.yaml");
        assert_eq!(
            friendly_path(Some(&PathBuf::from("/etc/nagris.yaml"))),
            "/etc/nagris.yaml"
        );
    }
}
