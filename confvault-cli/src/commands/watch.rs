use anyhow::Result;
use colored::Colorize;
use confvault_core::{AutoCommitGate, ChangeFilter, CheckpointController, Repository};
use notify::{EventKind, RecursiveMode, Watcher};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, DebouncedEvent};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

/// What a batch of debounced events asks the watcher to do.
#[derive(Debug, Default, PartialEq, Eq)]
struct Batch {
    /// A tracked file changed.
    commit: bool,
    /// The checkpoint marker changed.
    reload: bool,
}

pub async fn run(root: Option<PathBuf>, debounce_ms: u64) -> Result<()> {
    let repo = Arc::new(super::open_repo(root)?);
    let controller = Arc::new(CheckpointController::new(Arc::clone(&repo))?);
    let gate = controller.gate();
    let root_path = repo.root().to_path_buf();

    let (tx, mut rx) = mpsc::channel(100);

    let mut debouncer = new_debouncer(
        Duration::from_millis(debounce_ms),
        None,
        move |result: DebounceEventResult| {
            if let Err(e) = tx.blocking_send(result) {
                error!("Failed to send event: {}", e);
            }
        },
    )?;
    debouncer
        .watcher()
        .watch(&root_path, RecursiveMode::Recursive)?;

    info!("File watcher started for {:?}", root_path);
    println!("{}", "Watching for changes...".bold().cyan());
    println!("   {}: {}", "Root".bold(), root_path.display());
    if let Some(checkpoint) = controller.active() {
        println!(
            "   {}: {} (auto-commits suspended)",
            "Checkpoint".bold(),
            checkpoint.tag.yellow()
        );
    }
    println!();
    println!("{}", "Press Ctrl+C to stop".dimmed());
    println!();

    loop {
        tokio::select! {
            received = rx.recv() => {
                let Some(result) = received else { break };
                match result {
                    Ok(events) => {
                        let batch = classify(&events, &root_path, repo.filter());
                        if batch != Batch::default() {
                            handle_batch(batch, &repo, &controller, &gate).await;
                        }
                    }
                    Err(errors) => {
                        for error in errors {
                            error!("Watch error: {:?}", error);
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("{}", "Stopped watching".dimmed());
                break;
            }
        }
    }

    Ok(())
}

async fn handle_batch(
    batch: Batch,
    repo: &Arc<Repository>,
    controller: &Arc<CheckpointController>,
    gate: &AutoCommitGate,
) {
    let repo = Arc::clone(repo);
    let controller = Arc::clone(controller);
    let gate = gate.clone();

    let outcome = tokio::task::spawn_blocking(move || -> confvault_core::Result<()> {
        if batch.reload {
            match controller.reload()? {
                Some(checkpoint) => info!("Checkpoint {} is open", checkpoint.tag),
                None => info!("No checkpoint open"),
            }
        }
        if batch.commit || batch.reload {
            if let Some(info) = repo.auto_commit(&gate, "")? {
                println!(
                    "{} {} ({} file(s))",
                    "✓".green(),
                    info.id.short().yellow(),
                    info.change_count
                );
            }
        }
        Ok(())
    })
    .await;

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Auto-commit failed: {}", e),
        Err(e) => error!("Auto-commit task failed: {}", e),
    }
}

fn classify(events: &[DebouncedEvent], root: &Path, filter: &ChangeFilter) -> Batch {
    let mut batch = Batch::default();

    for event in events {
        if matches!(event.event.kind, EventKind::Access(_)) {
            continue;
        }
        for path in &event.event.paths {
            let Some(relative) = relative_path(path, root) else {
                continue;
            };
            if relative == format!("{}/CHECKPOINT", filter.metadata_dir()) {
                batch.reload = true;
            } else if filter.is_trackable(&relative) {
                batch.commit = true;
            }
        }
    }

    batch
}

fn relative_path(path: &Path, root: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect();
    let joined = parts?.join("/");
    (!joined.is_empty()).then_some(joined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind};
    use notify::Event;
    use std::time::Instant;

    fn event(kind: EventKind, path: &str) -> DebouncedEvent {
        DebouncedEvent::new(
            Event::new(kind).add_path(PathBuf::from(path)),
            Instant::now(),
        )
    }

    fn filter() -> ChangeFilter {
        ChangeFilter::new(".confvault", &[], &[], true).unwrap()
    }

    #[test]
    fn test_relative_path() {
        let root = PathBuf::from("/config");
        assert_eq!(
            relative_path(Path::new("/config/packages/a.yaml"), &root).as_deref(),
            Some("packages/a.yaml")
        );
        assert_eq!(relative_path(Path::new("/config"), &root), None);
        assert_eq!(relative_path(Path::new("/elsewhere/a.yaml"), &root), None);
    }

    #[test]
    fn test_classify_ignores_untracked_paths() {
        let root = PathBuf::from("/config");
        let events = vec![
            event(EventKind::Create(CreateKind::File), "/config/.confvault/objects/ab/cd"),
            event(EventKind::Modify(ModifyKind::Any), "/config/home-assistant.log"),
            event(EventKind::Modify(ModifyKind::Any), "/config/secrets.yaml"),
        ];
        assert_eq!(classify(&events, &root, &filter()), Batch::default());
    }

    #[test]
    fn test_classify_tracked_change_and_marker() {
        let root = PathBuf::from("/config");
        let events = vec![
            event(EventKind::Modify(ModifyKind::Any), "/config/automations.yaml"),
            event(EventKind::Access(AccessKind::Any), "/config/scripts.yaml"),
        ];
        assert_eq!(
            classify(&events, &root, &filter()),
            Batch {
                commit: true,
                reload: false
            }
        );

        let events = vec![event(
            EventKind::Create(CreateKind::File),
            "/config/.confvault/CHECKPOINT",
        )];
        assert_eq!(
            classify(&events, &root, &filter()),
            Batch {
                commit: false,
                reload: true
            }
        );
    }
}
