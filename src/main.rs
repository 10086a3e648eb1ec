use anyhow::{bail, Result};
use clap::Parser;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use aperture_cli::cli::{Cli, Commands, ConfigCommands, ServeArgs};
use aperture_cli::core::{
    ContainerStats, ContainerStatsSource, DemoContainers, DemoHost, DockerManager, HostStats,
    SystemSnapshot, SystemStatsSource,
};
use aperture_cli::hub::{collect_container_stats, collect_system_snapshot, ContainerStatsPayload, Envelope};
use aperture_cli::server;
use aperture_cli::utils::logging::init_logging;
use aperture_cli::utils::{format_bytes, format_duration, AppConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is normal
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => AppConfig::config_path()?,
    };

    let mut config = AppConfig::load_from(&config_path)?;
    config.apply_env()?;

    match cli.command {
        None => {
            handle_serve(config, ServeArgs::default()).await?;
        }
        Some(Commands::Serve(args)) => {
            handle_serve(config, args).await?;
        }
        Some(Commands::Stats { demo, json }) => {
            init_logging(&config.log)?;
            handle_stats(&config, demo, json).await?;
        }
        Some(Commands::Containers { demo, json }) => {
            init_logging(&config.log)?;
            handle_containers(&config, demo, json).await?;
        }
        Some(Commands::Config { command }) => {
            handle_config(command, config, &config_path)?;
        }
    }

    Ok(())
}

fn apply_serve_args(config: &mut AppConfig, args: ServeArgs) {
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(path) = args.static_path {
        config.server.static_path = path;
    }
    if args.demo {
        config.server.demo_mode = true;
    }
    if args.cors {
        config.server.cors = true;
    }
}

async fn handle_serve(mut config: AppConfig, args: ServeArgs) -> Result<()> {
    apply_serve_args(&mut config, args);
    init_logging(&config.log)?;

    let errors = config.validate();
    if !errors.is_empty() {
        bail!("Invalid configuration:\n  - {}", errors.join("\n  - "));
    }

    server::run(config).await
}

async fn handle_stats(config: &AppConfig, demo: bool, json: bool) -> Result<()> {
    let source: Arc<dyn SystemStatsSource> = if demo || config.server.demo_mode {
        Arc::new(DemoHost::new())
    } else {
        let host = HostStats::new();
        // CPU usage needs two samples some time apart
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
        Arc::new(host)
    };

    let snapshot = collect_system_snapshot(source.as_ref(), config.hub.source_timeout).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&Envelope::Stats(snapshot))?);
    } else {
        print_snapshot(&snapshot);
    }

    Ok(())
}

fn print_snapshot(snapshot: &SystemSnapshot) {
    println!("{} ({} / {})\n", snapshot.hostname, snapshot.os, snapshot.platform);
    println!("{:<10} {:>6.1}%  {} cores", "CPU", snapshot.cpu_usage, snapshot.cpu_cores);
    println!(
        "{:<10} {:>6.1}%  {} / {}",
        "Memory",
        snapshot.memory_percent,
        format_bytes(snapshot.memory_used),
        format_bytes(snapshot.memory_total)
    );
    println!(
        "{:<10} {:>6.1}%  {} / {}",
        "Disk",
        snapshot.disk_percent,
        format_bytes(snapshot.disk_used),
        format_bytes(snapshot.disk_total)
    );
    println!("{:<10} {}", "Uptime", format_duration(snapshot.uptime));
}

async fn handle_containers(config: &AppConfig, demo: bool, json: bool) -> Result<()> {
    let source: Arc<dyn ContainerStatsSource> = if demo || config.server.demo_mode {
        Arc::new(DemoContainers::new())
    } else {
        Arc::new(DockerManager::new()?)
    };

    let containers = collect_container_stats(source.as_ref(), config.hub.source_timeout).await?;

    if json {
        let envelope = Envelope::ContainerStats(ContainerStatsPayload {
            containers,
            timestamp: chrono::Utc::now().timestamp(),
        });
        println!("{}", serde_json::to_string_pretty(&envelope)?);
    } else {
        print_containers(&containers);
    }

    Ok(())
}

fn print_containers(containers: &BTreeMap<String, ContainerStats>) {
    if containers.is_empty() {
        println!("No running containers");
        return;
    }

    println!(
        "{:<14} {:>7} {:>22} {:>12} {:>12}",
        "Container", "CPU", "Memory", "Net RX", "Net TX"
    );
    println!("{}", "-".repeat(71));

    for (id, stats) in containers {
        let memory = format!(
            "{} / {}",
            format_bytes(stats.memory_usage),
            format_bytes(stats.memory_limit)
        );
        println!(
            "{:<14} {:>6.1}% {:>22} {:>12} {:>12}",
            id,
            stats.cpu_percent,
            memory,
            format_bytes(stats.network_rx),
            format_bytes(stats.network_tx)
        );
    }
}

fn handle_config(command: ConfigCommands, config: AppConfig, path: &Path) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            println!("# Effective configuration (file: {})\n", path.display());
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigCommands::Path => {
            println!("{}", path.display());
        }
        ConfigCommands::Init { force } => {
            if path.exists() && !force {
                bail!("{} already exists, use --force to overwrite", path.display());
            }
            AppConfig::default().save_to(path)?;
            println!("✓ Wrote default configuration to {}", path.display());
        }
        ConfigCommands::Validate => {
            let errors = config.validate();

            if errors.is_empty() {
                println!("✓ Configuration is valid");
            } else {
                println!("✗ Configuration errors:");
                for error in errors {
                    println!("  - {}", error);
                }
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_serve_args_override_config() {
        let mut config = AppConfig::default();
        apply_serve_args(
            &mut config,
            ServeArgs {
                host: Some("127.0.0.1".to_string()),
                port: Some(9100),
                static_path: Some(PathBuf::from("/srv/ui")),
                demo: true,
                cors: false,
            },
        );

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.static_path, PathBuf::from("/srv/ui"));
        assert!(config.server.demo_mode);
        assert!(!config.server.cors);
    }

    #[test]
    fn test_absent_serve_args_keep_config() {
        let mut config = AppConfig::default();
        config.server.port = 7000;
        config.server.demo_mode = true;

        apply_serve_args(&mut config, ServeArgs::default());

        assert_eq!(config.server.port, 7000);
        assert!(config.server.demo_mode);
    }
}
