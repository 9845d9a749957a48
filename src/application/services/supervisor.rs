//! Supervisor - runs every configured bot group
//!
//! Each group gets its own dispatcher, plugin registry, directory watcher
//! and transport. Watcher notifications go through a per-group queue that a
//! single task drains, so reloads within a group happen one at a time while
//! groups never wait on each other.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::application::errors::{BotError, ConfigError};
use crate::application::messaging::MessageDispatcher;
use crate::domain::traits::Bot;
use crate::infrastructure::config::{GroupConfig, HostConfig};
use crate::infrastructure::plugins::{DirectoryWatcher, ModuleLoader, PluginRegistry, WatchEvent};

/// Delay before polling again after a transport error
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// A running bot group
pub struct GroupHandle {
    config: GroupConfig,
    dispatcher: Arc<MessageDispatcher>,
    registry: Arc<PluginRegistry>,
    watcher: Option<DirectoryWatcher>,
    reload_task: JoinHandle<()>,
    serve_task: Option<JoinHandle<()>>,
}

impl GroupHandle {
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &GroupConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<MessageDispatcher> {
        &self.dispatcher
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Whether plugin files are being watched for changes
    pub fn is_watching(&self) -> bool {
        self.watcher.as_ref().is_some_and(DirectoryWatcher::is_running)
    }

    async fn stop(mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            watcher.stop();
        }
        if let Err(e) = self.reload_task.await {
            tracing::error!(group = %self.config.name, "Reload task failed: {}", e);
        }
        if let Some(task) = self.serve_task.take() {
            if let Err(e) = task.await {
                tracing::error!(group = %self.config.name, "Transport task failed: {}", e);
            }
        }

        let registry = Arc::clone(&self.registry);
        match tokio::task::spawn_blocking(move || registry.unload_all()).await {
            Ok(Ok(())) => tracing::info!(group = %self.config.name, "Group stopped"),
            Ok(Err(e)) => tracing::error!(group = %self.config.name, "Could not unload bots: {}", e),
            Err(e) => tracing::error!(group = %self.config.name, "Unload task failed: {}", e),
        }
    }
}

/// Owns and supervises all bot groups
pub struct Supervisor {
    host: HostConfig,
    groups: Vec<GroupHandle>,
    shutdown: watch::Sender<bool>,
}

impl Supervisor {
    pub fn new(host: HostConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            host,
            groups: Vec::new(),
            shutdown,
        }
    }

    pub fn groups(&self) -> &[GroupHandle] {
        &self.groups
    }

    pub fn group(&self, name: &str) -> Option<&GroupHandle> {
        self.groups.iter().find(|g| g.name() == name)
    }

    /// Start one group: connect its transport, load every bot in its folder
    /// and start watching the folder.
    ///
    /// Only a transport that fails to start aborts the group; plugin and
    /// watcher failures are logged and the group runs without them. Without
    /// a transport the group still loads and reloads its bots.
    pub async fn start_group(&mut self, config: GroupConfig, transport: Option<Box<dyn Bot>>) -> Result<(), BotError> {
        let loader = config.build_loader(&self.host);
        self.start_group_with_loader(config, loader, transport).await
    }

    /// Like [`Supervisor::start_group`], reading plugin files with `loader`
    /// instead of the one the group config names
    pub async fn start_group_with_loader(
        &mut self,
        config: GroupConfig,
        loader: Arc<dyn ModuleLoader>,
        transport: Option<Box<dyn Bot>>,
    ) -> Result<(), BotError> {
        if self.group(&config.name).is_some() {
            return Err(ConfigError::InvalidValue(format!("Duplicate group name '{}'", config.name)).into());
        }

        let transport = match transport {
            Some(mut transport) => {
                if let Err(e) = transport.start().await {
                    tracing::error!(group = %config.name, "Could not start transport, skipping group: {}", e);
                    return Err(e);
                }
                Some(transport)
            }
            None => None,
        };

        let dispatcher = Arc::new(MessageDispatcher::new(self.host.prefix.clone()));
        let registry = Arc::new(PluginRegistry::new(config.name.clone(), Arc::clone(&loader), dispatcher.clone()));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let watcher = match DirectoryWatcher::start(
            &config.folder,
            loader.extension(),
            Duration::from_millis(self.host.debounce_ms),
            move |event| {
                let _ = events_tx.send(event);
            },
        ) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::error!(group = %config.name, "Hot reload disabled: {}", e);
                None
            }
        };

        // Changes made while the folder loads are queued and applied afterwards
        {
            let registry = Arc::clone(&registry);
            let folder = config.folder.clone();
            match tokio::task::spawn_blocking(move || registry.load_all(&folder)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::error!(group = %config.name, "Could not load bots: {}", e),
                Err(e) => tracing::error!(group = %config.name, "Load task failed: {}", e),
            }
        }

        let reload_task = tokio::spawn(reload_loop(
            config.name.clone(),
            Arc::clone(&registry),
            events_rx,
            self.shutdown.subscribe(),
        ));
        let serve_task = transport.map(|transport| {
            tokio::spawn(serve(
                config.name.clone(),
                transport,
                Arc::clone(&dispatcher),
                self.shutdown.subscribe(),
            ))
        });

        tracing::info!(group = %config.name, "Group started with {} bot(s)", registry.len());
        self.groups.push(GroupHandle {
            config,
            dispatcher,
            registry,
            watcher,
            reload_task,
            serve_task,
        });
        Ok(())
    }

    /// Stop every group: watchers first, then transports, then unload all bots
    pub async fn shutdown(mut self) {
        tracing::info!("Shutting down {} group(s)", self.groups.len());
        let _ = self.shutdown.send(true);
        for group in self.groups.drain(..) {
            group.stop().await;
        }
    }
}

/// Apply watcher events to the registry, one at a time
async fn reload_loop(
    group: String,
    registry: Arc<PluginRegistry>,
    mut events: mpsc::UnboundedReceiver<WatchEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.changed() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let registry = Arc::clone(&registry);
        let applied = tokio::task::spawn_blocking(move || match event {
            WatchEvent::Changed(path) => registry.run(&path).map(|_| ()),
            WatchEvent::Removed(path) => registry.unload(&path).map(|_| ()),
        })
        .await;

        // Plugin failures were already logged by the registry
        if let Err(e) = applied {
            tracing::error!(group = %group, "Reload task failed: {}", e);
        }
    }
    tracing::debug!(group = %group, "Reload queue closed");
}

/// Feed inbound messages through the dispatcher and send the replies
async fn serve(
    group: String,
    mut transport: Box<dyn Bot>,
    dispatcher: Arc<MessageDispatcher>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let polled = tokio::select! {
            _ = shutdown.changed() => break,
            polled = transport.poll() => polled,
        };

        match polled {
            Ok(messages) => {
                for message in messages {
                    match dispatcher.process(&message) {
                        Ok(Some(reply)) => {
                            if let Err(e) = transport.send_message(&message.chat_id, &reply).await {
                                tracing::error!(group = %group, "Failed to send message: {}", e);
                            }
                        }
                        Ok(None) => {}
                        Err(e) => tracing::warn!(group = %group, "[{}] Handler error: {}", message.chat_id, e),
                    }
                }
            }
            Err(e) => {
                tracing::error!(group = %group, "Failed to get updates: {}", e);
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(RETRY_DELAY) => {}
                }
            }
        }
    }

    if let Err(e) = transport.stop().await {
        tracing::error!(group = %group, "Failed to stop transport: {}", e);
    }
}
