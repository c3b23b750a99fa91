//! Compose-label-aware dependency grouping (C5).
//!
//! Containers sharing a compose project (or standing alone) are bucketed
//! into [`Group`]s and ordered so dependencies are visited before their
//! dependents. The controller's own container, if present in the input, is
//! pulled out into a reserved `self_container` group.

use std::collections::{HashMap, HashSet};

use tugboat_types::{Action, ContainerInspect, ContainerPolicyRow, Group, GroupItem, LABEL_COMPOSE_CONFIG_FILES, LABEL_COMPOSE_PROJECT, PROTECTED_LABEL};

/// Reserved name for the group holding the controller's own container.
pub const SELF_GROUP_NAME: &str = "self_container";

/// Partition and order a host's containers into [`Group`]s.
///
/// `self_container_id` is the engine id of the container running the
/// controller's own image on this host, if known. `policy` maps container
/// name to its persisted policy row. `force_update` names a container that
/// should be promoted from `action=null` to `update` for this run only,
/// regardless of its policy row (a manual "force update" request).
pub fn build_groups(containers: &[ContainerInspect], self_container_id: Option<&str>, policy: &HashMap<String, ContainerPolicyRow>, force_update: Option<&str>) -> Vec<Group> {
    let mut buckets: HashMap<String, Vec<ContainerInspect>> = HashMap::new();
    let mut self_bucket: Vec<ContainerInspect> = Vec::new();

    for container in containers {
        if Some(container.id.as_str()) == self_container_id {
            self_bucket.push(container.clone());
            continue;
        }
        buckets.entry(group_key(container)).or_default().push(container.clone());
    }

    let mut groups = Vec::with_capacity(buckets.len() + 1);

    if !self_bucket.is_empty() {
        let items = self_bucket.into_iter().map(|c| self_item(c)).collect();
        groups.push(Group { name: SELF_GROUP_NAME.to_string(), is_self: true, items });
    }

    let mut keys: Vec<String> = buckets.keys().cloned().collect();
    keys.sort();

    for key in keys {
        let members = buckets.remove(&key).unwrap_or_default();
        let ordered = order_by_dependencies(members);
        let items = ordered.into_iter().map(|c| regular_item(c, policy, force_update)).collect();
        groups.push(Group { name: key, is_self: false, items });
    }

    groups
}

/// Compose project + config-files key, falling back to the container's own
/// name when both compose labels are empty.
fn group_key(container: &ContainerInspect) -> String {
    let project = container.config.labels.get(LABEL_COMPOSE_PROJECT).map(String::as_str).unwrap_or("");
    let files = container.config.labels.get(LABEL_COMPOSE_CONFIG_FILES).map(String::as_str).unwrap_or("");
    if project.is_empty() && files.is_empty() {
        container.name.clone().unwrap_or_else(|| container.id.clone())
    } else {
        format!("{project}:{files}")
    }
}

fn service_name(container: &ContainerInspect) -> String {
    container.config.labels.get(tugboat_types::LABEL_COMPOSE_SERVICE).cloned().unwrap_or_else(|| container.name.clone().unwrap_or_default())
}

fn dependencies(container: &ContainerInspect) -> Vec<String> {
    let label = container.config.labels.get(tugboat_types::LABEL_COMPOSE_DEPENDS_ON).map(String::as_str).unwrap_or("");
    if label.is_empty() {
        return Vec::new();
    }
    label.split(',').filter_map(|entry| entry.split(':').next()).filter(|s| !s.is_empty()).map(String::from).collect()
}

/// Depth-first post-order sort: dependencies come out before dependents. A
/// dependency cycle breaks the offending back-edge rather than erroring,
/// degrading gracefully toward each member's input-order position.
fn order_by_dependencies(members: Vec<ContainerInspect>) -> Vec<ContainerInspect> {
    let by_service: HashMap<String, usize> = members.iter().enumerate().map(|(i, c)| (service_name(c), i)).collect();

    let mut visited = vec![false; members.len()];
    let mut in_progress: HashSet<usize> = HashSet::new();
    let mut order: Vec<usize> = Vec::with_capacity(members.len());

    fn visit(idx: usize, members: &[ContainerInspect], by_service: &HashMap<String, usize>, visited: &mut [bool], in_progress: &mut HashSet<usize>, order: &mut Vec<usize>) {
        if visited[idx] || in_progress.contains(&idx) {
            return;
        }
        in_progress.insert(idx);
        for dep in dependencies(&members[idx]) {
            if let Some(&dep_idx) = by_service.get(&dep) {
                visit(dep_idx, members, by_service, visited, in_progress, order);
            }
        }
        in_progress.remove(&idx);
        visited[idx] = true;
        order.push(idx);
    }

    for idx in 0..members.len() {
        visit(idx, &members, &by_service, &mut visited, &mut in_progress, &mut order);
    }

    let mut members = members.into_iter().map(Some).collect::<Vec<_>>();
    order.into_iter().filter_map(|idx| members[idx].take()).collect()
}

fn self_item(container: ContainerInspect) -> GroupItem {
    let protected = container.config.labels.contains_key(PROTECTED_LABEL);
    GroupItem::new(container, Some(Action::Check), protected)
}

fn regular_item(container: ContainerInspect, policy: &HashMap<String, ContainerPolicyRow>, force_update: Option<&str>) -> GroupItem {
    let protected = container.config.labels.contains_key(PROTECTED_LABEL);
    let name = container.name.as_deref().unwrap_or("");

    let mut action = policy.get(name).filter(|row| row.check_enabled).map(|row| if row.update_enabled { Action::Update } else { Action::Check });

    if action.is_none() && force_update == Some(name) {
        action = Some(Action::Update);
    }

    if protected {
        action = None;
    }

    GroupItem::new(container, action, protected)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;
    use tugboat_types::{ContainerConfig, ContainerState};

    use super::*;

    fn container(id: &str, name: &str, labels: &[(&str, &str)]) -> ContainerInspect {
        ContainerInspect {
            id: id.to_string(),
            name: Some(name.to_string()),
            image: Some(format!("{name}-image-id")),
            config: ContainerConfig {
                image: Some(format!("{name}:latest")),
                labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
                ..Default::default()
            },
            state: ContainerState { status: "running".to_string(), health: None },
        }
    }

    #[test]
    fn standalone_containers_become_singleton_groups_keyed_by_name() {
        let containers = vec![container("1", "web", &[]), container("2", "db", &[])];
        let groups = build_groups(&containers, None, &HashMap::new(), None);
        let mut names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["db", "web"]);
    }

    #[test]
    fn compose_group_orders_dependencies_before_dependents() {
        let web = container("1", "web", &[("com.docker.compose.project", "app"), ("com.docker.compose.project.config_files", "compose.yml"), ("com.docker.compose.service", "web"), ("com.docker.compose.depends_on", "db:service_healthy")]);
        let db = container("2", "db", &[("com.docker.compose.project", "app"), ("com.docker.compose.project.config_files", "compose.yml"), ("com.docker.compose.service", "db")]);
        let groups = build_groups(&[web, db], None, &HashMap::new(), None);
        assert_eq!(groups.len(), 1);
        let ordered_names: Vec<_> = groups[0].items.iter().map(|i| i.container.name.clone().unwrap()).collect();
        assert_eq!(ordered_names, vec!["db".to_string(), "web".to_string()]);
    }

    #[test]
    fn dependency_cycle_does_not_panic_and_keeps_both_members() {
        let a = container("1", "a", &[("com.docker.compose.service", "a"), ("com.docker.compose.depends_on", "b")]);
        let b = container("2", "b", &[("com.docker.compose.service", "b"), ("com.docker.compose.depends_on", "a")]);
        let groups = build_groups(&[a, b], None, &HashMap::new(), None);
        assert_eq!(groups[0].items.len(), 2);
    }

    #[test]
    fn self_container_is_pulled_into_its_own_group() {
        let me = container("1", "controller", &[]);
        let other = container("2", "web", &[]);
        let groups = build_groups(&[me, other], Some("1"), &HashMap::new(), None);
        let self_group = groups.iter().find(|g| g.is_self).expect("self group present");
        assert_eq!(self_group.name, SELF_GROUP_NAME);
        assert_eq!(self_group.items[0].action, Some(Action::Check));
    }

    #[test]
    fn protection_label_forces_action_null_even_with_policy_enabled() {
        let mut c = container("1", "web", &[(PROTECTED_LABEL, "true")]);
        c.name = Some("web".to_string());
        let mut policy = HashMap::new();
        policy.insert("web".to_string(), ContainerPolicyRow { update_enabled: true, check_enabled: true, ..ContainerPolicyRow::new("h1", "web", Utc::now()) });
        let groups = build_groups(&[c], None, &policy, None);
        assert_eq!(groups[0].items[0].action, None);
        assert!(groups[0].items[0].protected);
    }
}
