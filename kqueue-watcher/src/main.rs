//! `kqueue-watch`: print file events for a directory tree as JSON lines.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use codex_kqueue_watcher::WatcherConfig;

#[derive(Debug, Parser)]
#[command(name = "kqueue-watch", about = "Watch a directory tree with kqueue")]
struct Cli {
    /// Directory to watch.
    root: Option<PathBuf>,

    /// TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Warn when more than this many descriptors are open.
    #[arg(long)]
    warning_threshold: Option<usize>,

    /// Maximum depth to watch below the root.
    #[arg(long)]
    max_depth: Option<usize>,

    /// Follow symbolic links during discovery.
    #[arg(long)]
    follow_symlinks: bool,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<WatcherConfig> {
        let mut config = match &self.config {
            Some(path) => WatcherConfig::load(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => WatcherConfig::default(),
        };

        if let Some(root) = self.root {
            config.root = Some(root);
        }
        if let Some(threshold) = self.warning_threshold {
            config.descriptor_warning_threshold = threshold;
        }
        if let Some(depth) = self.max_depth {
            config.max_depth = Some(depth);
        }
        if self.follow_symlinks {
            config.follow_symlinks = true;
        }

        if config.root.is_none() {
            anyhow::bail!("no directory to watch: pass one or set `root` in the config file");
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Cli::parse().into_config()?;
    run(config).await
}

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
async fn run(config: WatcherConfig) -> anyhow::Result<()> {
    use codex_kqueue_watcher::{
        DirectorySnapshot, Kqueue, KqueueWatcher, PathDiscovery, spawn_with_channel,
    };

    let mut snapshot = DirectorySnapshot::from_config(&config)?;
    let paths = snapshot
        .discover()
        .with_context(|| format!("failed to scan {}", snapshot.root().display()))?;

    let mut watcher = KqueueWatcher::<Kqueue, _>::new(config, snapshot)?;
    watcher.init(&paths)?;

    let (handle, mut events) = spawn_with_channel(watcher)?;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => println!("{}", serde_json::to_string(&event)?),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    drop(events);
    handle.await??;
    Ok(())
}

#[cfg(not(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
)))]
async fn run(_config: WatcherConfig) -> anyhow::Result<()> {
    Err(codex_kqueue_watcher::WatcherError::Unsupported(
        "kqueue is only available on macOS and the BSDs".to_string(),
    )
    .into())
}
