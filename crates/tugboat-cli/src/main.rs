use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use tugboat_config::Config;
use tugboat_core::engine;
use tugboat_core::host_registry::HostRegistry;
use tugboat_core::notifier::Notifier;
use tugboat_core::progress_cache::ProgressCache;
use tugboat_core::store::{FileStore, Store};
use tugboat_types::{AllProgress, Host, HostProgress};
use tugboat_webhook::WebhookNotifier;

/// Fleet-wide container check/update controller.
#[derive(Parser, Debug)]
#[command(name = "tugboat-cli", version)]
#[command(about = "Drives check/update runs across a fleet of tugboat agents")]
struct Cli {
    /// Path to the controller's TOML config.
    #[arg(long, default_value = "tugboat.toml")]
    config: PathBuf,

    /// Path to the JSON-backed persisted store.
    #[arg(long, default_value = "tugboat-store.json")]
    store: PathBuf,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a check/update pass. With no host, fans out across every enabled host.
    Run {
        /// Restrict the run to one host id.
        #[arg(long)]
        host: Option<String>,
        /// Force-update one container by name, bypassing its update_enabled gate. Requires --host.
        #[arg(long, requires = "host")]
        force: Option<String>,
    },
    /// Print the last persisted state of every tracked container.
    Status,
    /// Manage hosts in the config file.
    Host {
        #[command(subcommand)]
        cmd: HostCommand,
    },
    /// Print config and store diagnostics.
    Doctor,
}

#[derive(Subcommand, Debug)]
enum HostCommand {
    /// Add or replace a host entry.
    Add {
        id: String,
        name: String,
        url: String,
        #[arg(long)]
        secret: Option<String>,
        #[arg(long, default_value = "15s")]
        timeout: String,
        #[arg(long, default_value = "60s")]
        container_hc_timeout: String,
        #[arg(long)]
        prune: bool,
        #[arg(long)]
        prune_all: bool,
    },
    /// Remove a host entirely, dropping its persisted container rows too.
    Remove { id: String },
    /// Re-enable a disabled host.
    Enable { id: String },
    /// Disable a host without forgetting it.
    Disable { id: String },
}

trait Reporter {
    fn info(&self, msg: &str);
    fn warn(&self, msg: &str);
}

struct CliReporter;

impl Reporter for CliReporter {
    fn info(&self, msg: &str) {
        eprintln!("[info] {msg}");
    }

    fn warn(&self, msg: &str) {
        eprintln!("[warn] {msg}");
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let reporter = CliReporter;

    match &cli.cmd {
        Commands::Host { cmd } => run_host_command(cmd, &cli.config, &cli.store, &reporter),
        Commands::Run { host, force } => {
            let config = load_config(&cli.config, &reporter)?;
            let store = FileStore::open(&cli.store).with_context(|| format!("failed to open store {}", cli.store.display()))?;
            sync_hosts(&config, &store)?;
            run(&config, &store, host.as_deref(), force.as_deref())
        }
        Commands::Status => {
            let store = FileStore::open(&cli.store).with_context(|| format!("failed to open store {}", cli.store.display()))?;
            print_status(&store, &cli.config)
        }
        Commands::Doctor => {
            let config = load_config(&cli.config, &reporter)?;
            run_doctor(&cli.config, &cli.store, &config)
        }
    }
}

fn load_config(path: &Path, reporter: &dyn Reporter) -> Result<Config> {
    if path.exists() {
        Config::load(path).with_context(|| format!("failed to load config {}", path.display()))
    } else {
        reporter.warn(&format!("no config file at {}, using defaults", path.display()));
        Ok(Config::default())
    }
}

/// Mirror every host in `config` into the store so the engine's
/// `get_enabled_hosts` sees up-to-date connection settings.
fn sync_hosts(config: &Config, store: &FileStore) -> Result<()> {
    for host in &config.hosts {
        store.put_host(host.clone()).with_context(|| format!("failed to sync host {}", host.id))?;
    }
    Ok(())
}

fn run(config: &Config, store: &FileStore, host_id: Option<&str>, force: Option<&str>) -> Result<()> {
    let registry = HostRegistry::with_retry_policy(config.retry);
    let cache = ProgressCache::new();

    let notifier = if config.webhook.enabled { Some(WebhookNotifier::new(&config.webhook).context("failed to build webhook notifier")?) } else { None };
    let notifier_ref: Option<&dyn Notifier> = notifier.as_ref().map(|n| n as &dyn Notifier);

    match host_id {
        Some(id) => {
            let host = config.hosts.iter().find(|h| h.id == id).ok_or_else(|| anyhow::anyhow!("no such host: {id}"))?;
            let client = registry.get_or_insert(host).context("failed to build host client")?;
            let progress = engine::check_host(&client, host, store, &cache, None, force);
            print_host_progress(&host.id, &progress)
        }
        None => {
            let progress = engine::check_all(&registry, store, &cache, notifier_ref, &config.notify_title_template, &config.notify_body_template, None);
            print_all_progress(&progress)
        }
    }
}

fn print_host_progress(host_id: &str, progress: &HostProgress) -> Result<()> {
    let rendered = serde_json::to_string_pretty(progress).context("failed to serialize host progress")?;
    println!("host: {host_id}");
    println!("{rendered}");
    Ok(())
}

fn print_all_progress(progress: &AllProgress) -> Result<()> {
    let rendered = serde_json::to_string_pretty(progress).context("failed to serialize fleet progress")?;
    println!("{rendered}");
    Ok(())
}

fn print_status(store: &FileStore, config_path: &Path) -> Result<()> {
    let hosts = store.get_enabled_hosts().context("failed to read hosts from store")?;
    if hosts.is_empty() {
        println!("no enabled hosts (config: {})", config_path.display());
        return Ok(());
    }

    for host in &hosts {
        println!("host: {} ({})", host.id, host.name);
        let containers = store.get_host_containers(&host.id).context("failed to read container rows from store")?;
        if containers.is_empty() {
            println!("  (no tracked containers yet)");
            continue;
        }
        let mut names: Vec<&String> = containers.keys().collect();
        names.sort();
        for name in names {
            let row = &containers[name];
            let checked = row.checked_at.map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".to_string());
            let available = if row.update_available { "update available" } else { "up to date" };
            println!("  {name}: {available} (checked {checked}, check_enabled={}, update_enabled={})", row.check_enabled, row.update_enabled);
        }
    }
    Ok(())
}

fn run_host_command(cmd: &HostCommand, config_path: &Path, store_path: &Path, reporter: &dyn Reporter) -> Result<()> {
    let mut config = load_config(config_path, reporter)?;
    let store = FileStore::open(store_path).with_context(|| format!("failed to open store {}", store_path.display()))?;

    match cmd {
        HostCommand::Add { id, name, url, secret, timeout, container_hc_timeout, prune, prune_all } => {
            let host = Host {
                id: id.clone(),
                name: name.clone(),
                enabled: true,
                url: url.clone(),
                secret: secret.clone(),
                timeout: parse_duration(timeout)?,
                container_hc_timeout: parse_duration(container_hc_timeout)?,
                prune: *prune,
                prune_all: *prune_all,
            };
            config.hosts.retain(|h| h.id != host.id);
            config.hosts.push(host.clone());
            config.validate().context("updated config fails validation")?;
            config.save(config_path).with_context(|| format!("failed to save config {}", config_path.display()))?;
            store.put_host(host).context("failed to persist host to store")?;
            reporter.info(&format!("added host {id}"));
        }
        HostCommand::Remove { id } => {
            if !config.hosts.iter().any(|h| &h.id == id) {
                bail!("no such host: {id}");
            }
            config.hosts.retain(|h| &h.id != id);
            config.save(config_path).with_context(|| format!("failed to save config {}", config_path.display()))?;
            store.remove_host(id).context("failed to remove host from store")?;
            reporter.info(&format!("removed host {id}"));
        }
        HostCommand::Enable { id } => set_host_enabled(&mut config, config_path, &store, id, true, reporter)?,
        HostCommand::Disable { id } => set_host_enabled(&mut config, config_path, &store, id, false, reporter)?,
    }

    Ok(())
}

fn set_host_enabled(config: &mut Config, config_path: &Path, store: &FileStore, id: &str, enabled: bool, reporter: &dyn Reporter) -> Result<()> {
    let host = config.hosts.iter_mut().find(|h| h.id == id).ok_or_else(|| anyhow::anyhow!("no such host: {id}"))?;
    host.enabled = enabled;
    let updated = host.clone();
    config.save(config_path).with_context(|| format!("failed to save config {}", config_path.display()))?;
    store.put_host(updated).context("failed to persist host to store")?;
    reporter.info(&format!("host {id} {}", if enabled { "enabled" } else { "disabled" }));
    Ok(())
}

fn parse_duration(s: &str) -> Result<Duration> {
    humantime::parse_duration(s).with_context(|| format!("invalid duration: {s}"))
}

fn run_doctor(config_path: &Path, store_path: &Path, config: &Config) -> Result<()> {
    println!("config: {}", config_path.display());
    println!("store:  {}", store_path.display());
    println!("max_parallel_hosts: {}", config.max_parallel_hosts);
    println!("webhook_enabled: {}", config.webhook.enabled);
    println!("hosts:");
    for host in &config.hosts {
        println!("  {} ({}): enabled={} url={}", host.id, host.name, host.enabled, host.url);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn parse_duration_handles_valid_and_invalid_inputs() {
        assert!(parse_duration("15s").is_ok());
        assert!(parse_duration("nope").is_err());
    }

    #[test]
    fn cli_reporter_methods_are_callable() {
        let reporter = CliReporter;
        reporter.info("info");
        reporter.warn("warn");
    }

    #[test]
    fn load_config_falls_back_to_defaults_when_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let reporter = CliReporter;
        let config = load_config(&path, &reporter).unwrap();
        assert_eq!(config.max_parallel_hosts, Config::default().max_parallel_hosts);
    }

    #[test]
    fn host_add_then_remove_round_trips_through_config_and_store() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("tugboat.toml");
        let store_path = dir.path().join("store.json");
        let reporter = CliReporter;

        let add = HostCommand::Add {
            id: "h1".to_string(),
            name: "host one".to_string(),
            url: "https://agent.local:9443".to_string(),
            secret: None,
            timeout: "15s".to_string(),
            container_hc_timeout: "60s".to_string(),
            prune: false,
            prune_all: false,
        };
        run_host_command(&add, &config_path, &store_path, &reporter).unwrap();

        let config = Config::load(&config_path).unwrap();
        assert_eq!(config.hosts.len(), 1);
        assert_eq!(config.hosts[0].id, "h1");

        let remove = HostCommand::Remove { id: "h1".to_string() };
        run_host_command(&remove, &config_path, &store_path, &reporter).unwrap();

        let config = Config::load(&config_path).unwrap();
        assert!(config.hosts.is_empty());
    }

    #[test]
    fn sync_hosts_writes_every_config_host_into_the_store() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path().join("store.json")).unwrap();
        let mut config = Config::default();
        config.hosts.push(Host { id: "h1".to_string(), name: "h1".to_string(), enabled: true, url: "https://a".to_string(), secret: None, timeout: Duration::from_secs(15), container_hc_timeout: Duration::from_secs(60), prune: false, prune_all: false });

        sync_hosts(&config, &store).unwrap();
        assert_eq!(store.get_enabled_hosts().unwrap().len(), 1);
    }
}
