//! The check/update state machine (C8): per-container, per-group, per-host,
//! and fleet-wide. This module owns the only code paths that decide
//! whether a container gets recreated and drives that recreation.

use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tugboat_types::{Action, AllProgress, CheckResult, ContainerConfig, ContainerInspect, ContainerOutcome, CreateContainerBody, Group, GroupProgress, Host, HostProgress, ImageConfig, ItemResult, RunStatus};

use crate::digest;
use crate::group::build_groups;
use crate::host_client::HostClient;
use crate::host_registry::HostRegistry;
use crate::notifier::{self, HostRunResult, Notifier};
use crate::progress_cache::ProgressCache;
use crate::store::{ContainerPolicyPartial, Store};

const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Per-container availability check (§4.7.1). Never propagates an error:
/// any failure talking to the agent or resolving digests is logged by the
/// caller and treated as "no update available."
pub fn check_container_update_available(client: &HostClient, container: &ContainerInspect, store: &dyn Store, host_id: &str) -> CheckResult {
    if container.config.image.is_none() {
        return CheckResult::NotAvailable;
    }

    let name = container.name.clone().unwrap_or_default();
    let cached = store.get_host_containers(host_id).ok().and_then(|rows| rows.get(&name).cloned());

    let resolved = match digest::resolve(client, container, cached.as_ref()) {
        Ok(r) => r,
        Err(_) => return CheckResult::NotAvailable,
    };

    let now = Utc::now();
    let mut partial = ContainerPolicyPartial { image_id: Some(resolved.image_id.clone()), local_digests: Some(resolved.local_digests.clone()), checked_at: Some(now), ..Default::default() };

    if !resolved.available {
        let _ = store.insert_or_update_container(host_id, &name, partial);
        return CheckResult::NotAvailable;
    }

    let previously_notified = cached.as_ref().is_some_and(|row| row.remote_digests == resolved.remote_digests);
    if !previously_notified {
        partial.remote_digests = Some(resolved.remote_digests.clone());
    }
    let _ = store.insert_or_update_container(host_id, &name, partial);

    if previously_notified { CheckResult::AvailableNotified } else { CheckResult::Available }
}

/// Whether a label key matches `^[A-Za-z0-9][A-Za-z0-9_.-]*$`.
fn is_valid_label_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Config merge (§4.7.3): subtract the new image's own defaults from the
/// running container's config, then drop anything left empty.
pub fn merge_config(running: &ContainerConfig, image: &ImageConfig) -> CreateContainerBody {
    let env: Vec<String> = running
        .env
        .iter()
        .filter(|entry| !image.env.contains(entry))
        .filter(|entry| entry.split_once('=').map(|(_, v)| !v.trim().is_empty()).unwrap_or(true))
        .cloned()
        .collect();

    let labels: HashMap<String, String> = running
        .labels
        .iter()
        .filter(|(k, v)| image.labels.get(*k) != Some(*v))
        .filter(|(k, _)| is_valid_label_key(k))
        .filter(|(_, v)| !v.trim().is_empty())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let entrypoint = if image.entrypoint.as_ref().is_some_and(|e| !e.is_empty()) { None } else { running.entrypoint.clone() }.filter(|e| !e.is_empty());
    let command = if image.cmd.as_ref().is_some_and(|c| !c.is_empty()) { None } else { running.cmd.clone() }.filter(|c| !c.is_empty());
    let workdir = if image.working_dir.as_ref().is_some_and(|w| !w.trim().is_empty()) { None } else { running.working_dir.clone() }.filter(|w| !w.trim().is_empty());

    CreateContainerBody { image: running.image.clone().unwrap_or_default(), env, labels, entrypoint, command, workdir }
}

/// Health wait (§4.7.4): poll every 5s up to `timeout`. Returns `Ok(true)`
/// once the container is considered healthy, `Ok(false)` on timeout.
pub fn wait_for_healthy(client: &HostClient, container_ref: &str, timeout: Duration) -> bool {
    let start = Instant::now();
    loop {
        let elapsed = start.elapsed();
        let is_final_attempt = elapsed + HEALTH_POLL_INTERVAL >= timeout;

        let Ok(inspect) = client.container_inspect(container_ref) else {
            if elapsed >= timeout {
                return false;
            }
            thread::sleep(HEALTH_POLL_INTERVAL.min(timeout.saturating_sub(elapsed)));
            continue;
        };

        let healthy = match &inspect.state.health {
            Some(h) if h.status == "healthy" => true,
            Some(h) if h.status == "unknown" && is_final_attempt => inspect.state.is_running(),
            Some(_) => false,
            None => inspect.state.is_running(),
        };

        if healthy {
            return true;
        }
        if elapsed >= timeout {
            return false;
        }
        thread::sleep(HEALTH_POLL_INTERVAL.min(timeout.saturating_sub(elapsed)));
    }
}

/// Remove, recreate with the merged config, start, and wait for health. On
/// failure, roll back to the original image and config.
fn apply_item(client: &HostClient, host: &Host, item: &mut tugboat_types::GroupItem) -> ItemResult {
    let container_id = item.container.id.clone();
    let old_image_id = item.container.image.clone();
    let spec = item.image_spec.clone().unwrap_or_default();
    let config = item.config.clone().unwrap_or_else(|| CreateContainerBody { image: spec.clone(), ..Default::default() });

    let recreate = |body: &CreateContainerBody, commands: &[Vec<String>]| -> Result<String, tugboat_types::TugboatError> {
        client.container_remove(&container_id)?;
        let created = client.container_create(body)?;
        client.container_start(&created.id)?;
        for cmd in commands {
            let _ = client.command_run(cmd);
        }
        Ok(created.id)
    };

    match recreate(&config, &item.commands) {
        Ok(new_id) if wait_for_healthy(client, &new_id, host.container_hc_timeout) => {
            if let Ok(new_image) = client.image_inspect(&spec) {
                item.new_image = Some(new_image);
            }
            ItemResult::Updated
        }
        _ => {
            let _ = client.container_stop(&container_id);
            let _ = client.container_remove(&container_id);
            if let Some(old_id) = &old_image_id {
                let _ = client.image_tag(old_id, &spec);
            }
            let original = item.original_config.clone().unwrap_or_else(|| CreateContainerBody { image: spec, ..Default::default() });
            match recreate(&original, &item.commands) {
                Ok(new_id) if wait_for_healthy(client, &new_id, host.container_hc_timeout) => ItemResult::RolledBack,
                _ => ItemResult::Failed,
            }
        }
    }
}

fn persist_group_rows(store: &dyn Store, host_id: &str, group: &Group) {
    let now = Utc::now();
    for item in &group.items {
        let Some(name) = &item.container.name else { continue };
        let mut partial = ContainerPolicyPartial { update_available: Some(item.available), ..Default::default() };
        if matches!(item.temp_result, Some(ItemResult::Updated)) {
            partial.updated_at = Some(now);
            if let Ok(rows) = store.get_host_containers(host_id) {
                if let Some(row) = rows.get(name) {
                    partial.local_digests = Some(row.remote_digests.clone());
                }
            }
        }
        let _ = store.insert_or_update_container(host_id, name, partial);
    }
}

/// Per-group recreate (§4.7.2). Mutates `group` in place with the scratch
/// state each phase populates, and returns the group's progress summary.
pub fn check_group(client: &HostClient, host: &Host, group: &mut Group, store: &dyn Store, cache: &ProgressCache, host_key: &str) -> GroupProgress {
    let group_key = ProgressCache::group_key(host_key, &group.name);

    if matches!(cache.get_group(&group_key).and_then(|p| p.status), Some(RunStatus::Preparing) | Some(RunStatus::Checking) | Some(RunStatus::Updating)) {
        return cache.get_group(&group_key).unwrap_or_default();
    }

    cache.set_group(&group_key, GroupProgress { status: Some(RunStatus::Preparing), ..Default::default() });

    let mut progress = GroupProgress { status: Some(RunStatus::Checking), ..Default::default() };
    cache.set_group(&group_key, progress.clone());

    for item in group.items.iter_mut().filter(|i| matches!(i.action, Some(Action::Check) | Some(Action::Update))) {
        let result = check_container_update_available(client, &item.container, store, &host.id);
        item.available = matches!(result, CheckResult::Available | CheckResult::AvailableNotified);
        if matches!(result, CheckResult::Available) {
            progress.available += 1;
            progress.available_items.push(ContainerOutcome { name: item.container.name.clone().unwrap_or_default(), spec: item.image_spec.clone().unwrap_or_default() });
        }
    }

    for item in group.items.iter_mut() {
        item.will_update = item.available && matches!(item.action, Some(Action::Update)) && !item.protected && item.container.state.is_running();
    }

    if !group.items.iter().any(|i| i.will_update) {
        progress.status = Some(RunStatus::Done);
        cache.set_group(&group_key, progress.clone());
        persist_group_rows(store, &host.id, group);
        return progress;
    }

    progress.status = Some(RunStatus::Updating);
    cache.set_group(&group_key, progress.clone());

    for item in group.items.iter().filter(|i| i.will_update) {
        let Some(spec) = &item.image_spec else { continue };
        if client.image_pull(spec).is_err() {
            progress.status = Some(RunStatus::Error);
            cache.set_group(&group_key, progress.clone());
            persist_group_rows(store, &host.id, group);
            return progress;
        }
    }

    let mut stopped: Vec<usize> = Vec::new();
    let mut stop_failed = false;
    for idx in (0..group.items.len()).rev() {
        let will_update = group.items[idx].will_update;
        let protected = group.items[idx].protected;
        let running = group.items[idx].container.state.is_running();
        if protected || !running {
            continue;
        }

        if will_update {
            let spec = group.items[idx].image_spec.clone().unwrap_or_default();
            match client.image_inspect(&spec) {
                Ok(image) => {
                    let running = group.items[idx].container.config.clone();
                    let original = CreateContainerBody {
                        image: spec.clone(),
                        env: running.env.clone(),
                        labels: running.labels.clone(),
                        entrypoint: running.entrypoint.clone(),
                        command: running.cmd.clone(),
                        workdir: running.working_dir.clone(),
                    };
                    let config = merge_config(&running, &image.config);
                    group.items[idx].original_config = Some(original);
                    group.items[idx].config = Some(config);
                }
                Err(_) => {
                    stop_failed = true;
                    break;
                }
            }
        }

        if client.container_stop(&group.items[idx].container.id).is_err() {
            stop_failed = true;
            break;
        }
        stopped.push(idx);
    }

    if stop_failed {
        for &idx in stopped.iter().rev() {
            let _ = client.container_start(&group.items[idx].container.id);
        }
        progress.status = Some(RunStatus::Error);
        cache.set_group(&group_key, progress.clone());
        persist_group_rows(store, &host.id, group);
        return progress;
    }

    let mut any_failed = false;
    for idx in 0..group.items.len() {
        if !stopped.contains(&idx) {
            continue;
        }

        if !group.items[idx].will_update {
            let _ = client.container_start(&group.items[idx].container.id);
            wait_for_healthy(client, &group.items[idx].container.id, host.container_hc_timeout);
            continue;
        }

        if any_failed {
            let _ = client.container_start(&group.items[idx].container.id);
            continue;
        }

        let outcome = apply_item(client, host, &mut group.items[idx]);
        let name = group.items[idx].container.name.clone().unwrap_or_default();
        let spec = group.items[idx].image_spec.clone().unwrap_or_default();
        match outcome {
            ItemResult::Updated => {
                progress.updated += 1;
                progress.updated_items.push(ContainerOutcome { name, spec });
            }
            ItemResult::RolledBack => {
                progress.rolled_back += 1;
                progress.rolled_back_items.push(ContainerOutcome { name, spec });
            }
            ItemResult::Failed => {
                progress.failed += 1;
                progress.failed_items.push(ContainerOutcome { name, spec });
                any_failed = true;
            }
        }
        group.items[idx].temp_result = Some(outcome);
    }

    progress.status = Some(RunStatus::Done);
    cache.set_group(&group_key, progress.clone());
    persist_group_rows(store, &host.id, group);
    progress
}

/// Per-host run (§4.7.5). Lists containers once, builds groups, and runs
/// them sequentially: groups never run concurrently on the same host, to
/// avoid disturbing networks or volumes shared between them.
pub fn check_host(client: &HostClient, host: &Host, store: &dyn Store, cache: &ProgressCache, self_engine_id: Option<&str>, force_update: Option<&str>) -> HostProgress {
    let host_key = ProgressCache::host_key(&host.id, &host.name);
    let mut progress = HostProgress { status: Some(RunStatus::Preparing), ..Default::default() };
    cache.set_host(&host_key, progress.clone());

    let containers = match client.container_list(true) {
        Ok(c) => c,
        Err(_) => {
            progress.status = Some(RunStatus::Error);
            cache.set_host(&host_key, progress.clone());
            return progress;
        }
    };

    let policy = store.get_host_containers(&host.id).unwrap_or_default();
    progress.status = Some(RunStatus::Checking);
    cache.set_host(&host_key, progress.clone());

    let mut groups = build_groups(&containers, self_engine_id, &policy, force_update);

    for group in groups.iter_mut() {
        let group_progress = check_group(client, host, group, store, cache, &host_key);
        progress.available += group_progress.available;
        progress.updated += group_progress.updated;
        progress.rolled_back += group_progress.rolled_back;
        progress.failed += group_progress.failed;
        progress.available_items.extend(group_progress.available_items.clone());
        progress.updated_items.extend(group_progress.updated_items.clone());
        progress.rolled_back_items.extend(group_progress.rolled_back_items.clone());
        progress.failed_items.extend(group_progress.failed_items.clone());
        progress.groups.insert(group.name.clone(), group_progress);
        cache.set_host(&host_key, progress.clone());
    }

    if host.prune {
        progress.status = Some(RunStatus::Pruning);
        cache.set_host(&host_key, progress.clone());
        let _ = client.image_prune(host.prune_all);
    }

    progress.status = Some(RunStatus::Done);
    cache.set_host(&host_key, progress.clone());
    progress
}

/// Global fan-out (§4.7.6): one task per enabled host, run concurrently,
/// aggregated into a single map, followed by the Notifier Bridge.
pub fn check_all(registry: &HostRegistry, store: &dyn Store, cache: &ProgressCache, notifier: Option<&dyn Notifier>, title_template: &str, body_template: &str, self_engine_id: Option<&str>) -> AllProgress {
    cache.set_all(AllProgress { status: Some(RunStatus::Preparing), hosts: HashMap::new() });

    let hosts = store.get_enabled_hosts().unwrap_or_default();
    cache.update_all(|p| p.status = Some(RunStatus::Checking));

    let outcomes: Vec<(Host, Option<HostProgress>)> = thread::scope(|scope| {
        let handles: Vec<_> = hosts
            .iter()
            .map(|host| {
                scope.spawn(move || {
                    let client = registry.get_or_insert(host).ok()?;
                    Some(check_host(&client, host, store, cache, self_engine_id, None))
                })
            })
            .collect();

        hosts.iter().cloned().zip(handles.into_iter().map(|h| h.join().unwrap_or(None))).collect()
    });

    let mut all_progress = AllProgress { status: Some(RunStatus::Done), hosts: HashMap::new() };
    let mut run_results = Vec::with_capacity(outcomes.len());
    for (host, progress) in outcomes {
        all_progress.hosts.insert(host.id.clone(), progress.clone());
        run_results.push(HostRunResult { host_id: host.id, host_name: host.name, progress });
    }
    cache.set_all(all_progress.clone());

    if let Some(notifier) = notifier {
        let _ = notifier::dispatch(notifier, title_template, body_template, &run_results);
    }

    all_progress
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_container_update_available_returns_not_available_without_image_spec() {
        use std::time::Duration;
        use tugboat_types::{ContainerState, Host};

        use crate::store::FileStore;

        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("store.json")).unwrap();
        let host = Host { id: "h1".to_string(), name: "h1".to_string(), enabled: true, url: "https://agent.local".to_string(), secret: None, timeout: Duration::from_secs(15), container_hc_timeout: Duration::from_secs(60), prune: false, prune_all: false };
        let client = HostClient::new(&host).unwrap();

        let container = ContainerInspect { id: "c1".to_string(), name: Some("web".to_string()), image: Some("id".to_string()), config: ContainerConfig::default(), state: ContainerState::default() };

        let result = check_container_update_available(&client, &container, &store, "h1");
        assert_eq!(result, CheckResult::NotAvailable);
    }

    #[test]
    fn merge_config_subtracts_image_defaults_and_drops_empty_fields() {
        let running = ContainerConfig {
            image: Some("app:v2".to_string()),
            env: vec!["FOO=bar".to_string(), "SHARED=1".to_string(), "EMPTY=".to_string()],
            labels: HashMap::from([("custom.key".to_string(), "1".to_string()), ("bad key".to_string(), "x".to_string())]),
            entrypoint: Some(vec!["/bin/app".to_string()]),
            cmd: None,
            working_dir: Some("/srv".to_string()),
        };
        let image = ImageConfig { entrypoint: Some(vec!["/bin/app".to_string()]), cmd: None, working_dir: None, env: vec!["SHARED=1".to_string()], labels: HashMap::new() };

        let merged = merge_config(&running, &image);
        assert_eq!(merged.env, vec!["FOO=bar".to_string()]);
        assert_eq!(merged.labels.get("custom.key"), Some(&"1".to_string()));
        assert!(!merged.labels.contains_key("bad key"));
        assert_eq!(merged.entrypoint, None);
        assert_eq!(merged.workdir, Some("/srv".to_string()));
    }

    #[test]
    fn is_valid_label_key_rejects_non_alnum_leading_char() {
        assert!(is_valid_label_key("a.b-c_1"));
        assert!(!is_valid_label_key("-leading"));
        assert!(!is_valid_label_key("has space"));
    }
}
