use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;

use botplug::application::messaging::MessageDispatcher;
use botplug::application::services::Supervisor;
use botplug::infrastructure::adapters;
use botplug::infrastructure::config::Config;
use botplug::infrastructure::plugins::{PluginRegistry, PluginState};

#[derive(Parser)]
#[command(name = "botplug")]
#[command(about = "A bot host that hot-reloads bots from plugin folders", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.yaml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start every bot group and watch their folders
    Run,
    /// Load every plugin once and report its state
    Check,
    /// Generate default config
    InitConfig,
    /// Show version
    Version,
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Run => run(&cli.config),
        Commands::Check => check(&cli.config),
        Commands::InitConfig => init_config(&cli.config),
        Commands::Version => {
            println!("botplug v{}", env!("CARGO_PKG_VERSION"));
            0
        }
    };
    std::process::exit(code);
}

fn load_config(config_path: &str) -> Config {
    if Path::new(config_path).exists() {
        Config::load(config_path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config: {}, using environment", e);
            Config::load_env()
        })
    } else {
        Config::load_env()
    }
}

fn run(config_path: &str) -> i32 {
    let config = load_config(config_path);
    let groups = config.groups();
    if groups.is_empty() {
        tracing::error!("No bot groups configured. Run `botplug init-config` to create {}", config_path);
        return 1;
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to start runtime: {}", e);
            return 1;
        }
    };

    rt.block_on(async {
        let mut supervisor = Supervisor::new(config.host.clone());
        for group in groups {
            let transport = adapters::for_group(&group);
            let name = group.name.clone();
            if let Err(e) = supervisor.start_group(group, Some(transport)).await {
                tracing::error!("Group '{}' not started: {}", name, e);
            }
        }

        if supervisor.groups().is_empty() {
            tracing::error!("No bot group could be started");
            return 1;
        }

        tracing::info!("Running {} group(s), press Ctrl-C to stop", supervisor.groups().len());
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to wait for Ctrl-C: {}", e);
        }
        supervisor.shutdown().await;
        0
    })
}

fn check(config_path: &str) -> i32 {
    let config = load_config(config_path);
    let mut failed = 0;

    for group in config.groups() {
        let dispatcher = Arc::new(MessageDispatcher::new(config.host.prefix.clone()));
        let registry = PluginRegistry::new(group.name.clone(), group.build_loader(&config.host), dispatcher.clone());

        println!("{} ({})", group.name, group.folder.display());
        if let Err(e) = registry.load_all(&group.folder) {
            println!("  error: {}", e);
            failed += 1;
            continue;
        }
        for (path, state) in registry.identities() {
            let name = registry.instance_name(&path).unwrap_or_else(|| "-".to_string());
            let handlers = registry.handler_count(&path).unwrap_or(0);
            println!("  {:<12} {:<24} {} handler(s)  {}", state.to_string(), name, handlers, path.display());
        }
        failed += registry.identities().iter()
            .filter(|(_, state)| *state == PluginState::LoadFailed)
            .count();
        if let Err(e) = registry.unload_all() {
            println!("  error: {}", e);
            failed += 1;
        }
    }

    if failed > 0 { 1 } else { 0 }
}

fn init_config(config_path: &str) -> i32 {
    if Path::new(config_path).exists() {
        println!("{} already exists", config_path);
        return 1;
    }

    let yaml = match Config::example().to_yaml() {
        Ok(yaml) => yaml,
        Err(e) => {
            eprintln!("{}", e);
            return 1;
        }
    };
    match std::fs::write(config_path, yaml) {
        Ok(()) => {
            println!("Created {}", config_path);
            0
        }
        Err(e) => {
            eprintln!("Failed to write {}: {}", config_path, e);
            1
        }
    }
}
