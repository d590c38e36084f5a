//! pipview application library.

pub mod commands;

use std::env;
use std::path::PathBuf;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pipview_ipc::ViewerConfig;

/// Environment variable naming the config file when no argument is given.
pub const CONFIG_ENV: &str = "PIPVIEW_CONFIG";

/// Initialize logging.
fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "pipview=debug,pipview_lib=debug,pipview_engine=debug,pipview_capture=debug".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Pick the config path: the first argument wins over the environment.
pub fn config_path(arg: Option<String>, env_value: Option<String>) -> Option<PathBuf> {
    arg.or(env_value)
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
}

/// Load the viewer config, falling back to defaults when no file is named.
pub fn load_config(path: Option<PathBuf>) -> anyhow::Result<ViewerConfig> {
    match path {
        Some(path) => {
            info!(path = %path.display(), "Loading config");
            ViewerConfig::load(&path)
                .with_context(|| format!("Failed to load config from {}", path.display()))
        }
        None => Ok(ViewerConfig::default()),
    }
}

fn startup_config() -> anyhow::Result<ViewerConfig> {
    load_config(config_path(env::args().nth(1), env::var(CONFIG_ENV).ok()))
}

#[cfg(windows)]
pub fn run() -> anyhow::Result<()> {
    use std::io;
    use std::thread;

    use tracing::{error, warn};

    use pipview_capture::wgc::{init_apartment, OverlayWindow};
    use pipview_ipc::{command_channel, event_channel, ContentSize, ViewerCommand};

    init_logging();
    let config = startup_config()?;
    info!("pipview starting");

    init_apartment()?;
    let size = ContentSize::new(config.surface.initial_width, config.surface.initial_height);
    let overlay = OverlayWindow::create("pipview", size)?;
    let hwnd = overlay.hwnd();
    let handle = overlay.handle();
    let resize = overlay.resize_hook();

    let (command_tx, command_rx) = command_channel();
    let (event_tx, event_rx) = event_channel();

    let engine = thread::Builder::new()
        .name("pipview-engine".into())
        .spawn(move || {
            let result = engine::run(hwnd, handle, resize, &config, command_rx, event_tx);
            if let Err(e) = &result {
                error!("Engine failed: {:#}", e);
                handle.close();
            }
            result
        })
        .context("Failed to spawn engine thread")?;

    thread::Builder::new()
        .name("pipview-events".into())
        .spawn(move || {
            for event in event_rx.iter() {
                if !commands::log_event(&event) {
                    handle.close();
                    break;
                }
            }
        })
        .context("Failed to spawn event thread")?;

    let console_tx = command_tx.clone();
    thread::Builder::new()
        .name("pipview-console".into())
        .spawn(move || {
            if let Err(e) = commands::forward_commands(io::stdin().lock(), &console_tx) {
                warn!("Console input stopped: {:#}", e);
            }
        })
        .context("Failed to spawn console thread")?;

    if command_tx.send(ViewerCommand::StartCapture).is_err() {
        warn!("Engine exited before the first capture");
    }

    overlay.run_message_loop();

    // The engine may already be gone.
    let _ = command_tx.send(ViewerCommand::Shutdown);
    engine
        .join()
        .map_err(|_| anyhow::anyhow!("Engine thread panicked"))??;

    info!("pipview stopped");
    Ok(())
}

#[cfg(windows)]
mod engine {
    use crossbeam_channel::{Receiver, Sender};
    use tracing::{info, warn};

    use pipview_capture::wgc::{
        init_apartment, BorderlessAccess, OverlayHandle, ResizeHook, SystemPicker, WgcBackend,
        WgcItem, WindowPicker,
    };
    use pipview_capture::{DrawingSurface, SourcePicker};
    use pipview_engine::{create_engine, Collaborators};
    use pipview_ipc::{ViewerCommand, ViewerConfig, ViewerEvent};

    /// Build the Windows backend and run the engine on the calling thread.
    pub fn run(
        hwnd: isize,
        overlay: OverlayHandle,
        resize: ResizeHook,
        config: &ViewerConfig,
        command_rx: Receiver<ViewerCommand>,
        event_tx: Sender<ViewerEvent>,
    ) -> anyhow::Result<()> {
        init_apartment()?;
        let backend = WgcBackend::new(hwnd)?;

        let picker: Box<dyn SourcePicker<Item = WgcItem>> = match &config.capture.target_window {
            Some(title) => Box::new(WindowPicker::new(title.clone(), hwnd)),
            None => Box::new(SystemPicker::new(hwnd)),
        };
        let collaborators = Collaborators {
            picker,
            access: Box::new(BorderlessAccess),
            host: Box::new(overlay),
        };

        let mut engine = create_engine(backend, config, collaborators, command_rx, event_tx)?;

        let surface = engine.pipeline().surface();
        resize.set(move |viewport| {
            if let Err(e) = surface.lock().set_viewport(viewport) {
                warn!(%viewport, "Failed to refit surface: {}", e);
            }
        });

        info!("Engine thread starting");
        engine.run();
        info!("Engine thread stopped");
        Ok(())
    }
}

#[cfg(not(windows))]
pub fn run() -> anyhow::Result<()> {
    init_logging();
    let _config = startup_config()?;
    anyhow::bail!("pipview is only supported on Windows")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_prefers_argument() {
        assert_eq!(
            config_path(Some("a.json".into()), Some("b.json".into())),
            Some(PathBuf::from("a.json"))
        );
        assert_eq!(
            config_path(None, Some("b.json".into())),
            Some(PathBuf::from("b.json"))
        );
        assert_eq!(config_path(None, Some(" ".into())), None);
    }

    #[test]
    fn test_missing_path_uses_defaults() {
        let config = load_config(None).unwrap();
        assert_eq!(config.metrics_interval_ms, 1000);
    }

    #[test]
    fn test_unreadable_config_is_an_error() {
        let err = load_config(Some(PathBuf::from("/nonexistent/pipview.json"))).unwrap_err();
        assert!(err.to_string().contains("Failed to load config"));
    }
}
