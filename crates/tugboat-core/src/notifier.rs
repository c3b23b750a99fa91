//! Summary rendering and the `Notifier` trait (C9).
//!
//! The bridge owns exactly two responsibilities: deciding whether a
//! completed fan-out is worth announcing at all, and rendering the
//! announcement from a simple template. Actual delivery is delegated to
//! whatever `Notifier` is wired in — see `tugboat-webhook` for one such
//! implementation.

use tugboat_types::{ContainerOutcome, HostProgress, TugboatError};

/// One host's contribution to a completed (or failed) fan-out.
#[derive(Debug, Clone)]
pub struct HostRunResult {
    pub host_id: String,
    pub host_name: String,
    /// `None` when the host's own run failed outright.
    pub progress: Option<HostProgress>,
}

/// A rendered, ready-to-send notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedNotification {
    pub title: String,
    pub body: String,
}

/// Anything capable of delivering a rendered notification somewhere.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &RenderedNotification) -> Result<(), TugboatError>;
}

/// True iff any host's progress shows at least one container that was
/// available, updated, rolled back, or failed this run.
pub fn any_worthy(results: &[HostRunResult]) -> bool {
    results.iter().filter_map(|r| r.progress.as_ref()).any(|p| p.available > 0 || p.updated > 0 || p.rolled_back > 0 || p.failed > 0)
}

/// Render `title_template`/`body_template` against the aggregate counts
/// across `results`, returning `None` when nothing is worth announcing.
///
/// The title and the lead line of the body are built from
/// `title_template`/`body_template`, which support `{{available}}`,
/// `{{updated}}`, `{{rolled_back}}`, `{{failed}}`, and `{{host_count}}`
/// placeholders. The rest of the body lists each affected container by
/// name and image spec, grouped per host under `Updated`, `Available`,
/// `Rolled-back after fail`, and `Failed and not rolled-back` headers.
pub fn render(title_template: &str, body_template: &str, results: &[HostRunResult]) -> Option<RenderedNotification> {
    if !any_worthy(results) {
        return None;
    }

    let mut available = 0u32;
    let mut updated = 0u32;
    let mut rolled_back = 0u32;
    let mut failed = 0u32;

    for progress in results.iter().filter_map(|r| r.progress.as_ref()) {
        available += progress.available;
        updated += progress.updated;
        rolled_back += progress.rolled_back;
        failed += progress.failed;
    }

    let substitute = |template: &str| {
        template
            .replace("{{available}}", &available.to_string())
            .replace("{{updated}}", &updated.to_string())
            .replace("{{rolled_back}}", &rolled_back.to_string())
            .replace("{{failed}}", &failed.to_string())
            .replace("{{host_count}}", &results.len().to_string())
    };

    let mut body = substitute(body_template);
    for result in results {
        let Some(progress) = &result.progress else { continue };
        let mut host_part = String::new();
        push_section(&mut host_part, "Updated", &progress.updated_items);
        push_section(&mut host_part, "Available", &progress.available_items);
        push_section(&mut host_part, "Rolled-back after fail", &progress.rolled_back_items);
        push_section(&mut host_part, "Failed and not rolled-back", &progress.failed_items);
        if !host_part.is_empty() {
            body.push_str(&format!("\n\nHost: {}\n{}", result.host_name, host_part));
        }
    }

    Some(RenderedNotification { title: substitute(title_template), body })
}

fn push_section(buf: &mut String, header: &str, items: &[ContainerOutcome]) {
    if items.is_empty() {
        return;
    }
    buf.push_str(&format!("{header}:\n"));
    for item in items {
        buf.push_str(&format!("- {} {}\n", item.name, item.spec));
    }
}

/// Render and, if worth announcing, hand the result to `notifier`.
pub fn dispatch(notifier: &dyn Notifier, title_template: &str, body_template: &str, results: &[HostRunResult]) -> Result<(), TugboatError> {
    match render(title_template, body_template, results) {
        Some(notification) => notifier.notify(&notification),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(available: u32, updated: u32) -> HostProgress {
        HostProgress { available, updated, ..Default::default() }
    }

    #[test]
    fn not_worthy_when_every_host_is_quiet() {
        let results = vec![HostRunResult { host_id: "h1".into(), host_name: "one".into(), progress: Some(HostProgress::default()) }];
        assert!(!any_worthy(&results));
        assert!(render("t", "b", &results).is_none());
    }

    #[test]
    fn worthy_when_any_host_has_activity() {
        let results = vec![
            HostRunResult { host_id: "h1".into(), host_name: "one".into(), progress: Some(HostProgress::default()) },
            HostRunResult { host_id: "h2".into(), host_name: "two".into(), progress: Some(progress(1, 0)) },
        ];
        assert!(any_worthy(&results));
    }

    #[test]
    fn render_substitutes_aggregate_counts() {
        let results = vec![HostRunResult { host_id: "h1".into(), host_name: "one".into(), progress: Some(progress(2, 1)) }];
        let rendered = render("{{available}} available", "updated={{updated}} hosts={{host_count}}", &results).unwrap();
        assert_eq!(rendered.title, "2 available");
        assert_eq!(rendered.body, "updated=1 hosts=1");
    }

    #[test]
    fn render_names_each_updated_container_under_its_section() {
        let host_progress = HostProgress {
            updated: 1,
            updated_items: vec![ContainerOutcome { name: "web".to_string(), spec: "app:latest".to_string() }],
            ..Default::default()
        };
        let results = vec![HostRunResult { host_id: "h1".into(), host_name: "one".into(), progress: Some(host_progress) }];
        let rendered = render("t", "b", &results).unwrap();
        assert!(rendered.body.contains("Updated:\n- web app:latest"));
    }

    #[test]
    fn render_labels_rolled_back_containers_distinctly_from_failed_ones() {
        let host_progress = HostProgress {
            rolled_back: 1,
            failed: 1,
            rolled_back_items: vec![ContainerOutcome { name: "api".to_string(), spec: "api:v2".to_string() }],
            failed_items: vec![ContainerOutcome { name: "db".to_string(), spec: "db:v3".to_string() }],
            ..Default::default()
        };
        let results = vec![HostRunResult { host_id: "h1".into(), host_name: "one".into(), progress: Some(host_progress) }];
        let rendered = render("t", "b", &results).unwrap();
        assert!(rendered.body.contains("Rolled-back after fail:\n- api api:v2"));
        assert!(rendered.body.contains("Failed and not rolled-back:\n- db db:v3"));
    }

    #[test]
    fn failed_host_runs_contribute_nothing_but_do_not_panic() {
        let results = vec![HostRunResult { host_id: "h1".into(), host_name: "one".into(), progress: None }];
        assert!(!any_worthy(&results));
    }
}
