//! ---
//! nb_section: "01-core-functionality"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "Task threads and cooperative shutdown."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};
use tracing::{error, info, Span};

/// Flag tasks poll between timed waits.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    /// Untriggered signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every task holding a clone to stop.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether shutdown was requested.
    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Named task threads joined together.
#[derive(Debug, Default)]
pub struct TaskSet {
    tasks: Vec<(String, JoinHandle<Result<()>>)>,
}

impl TaskSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `body` on a named thread inside the caller's current span.
    pub fn spawn<F>(&mut self, name: impl Into<String>, body: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let name = name.into();
        let task_name = name.clone();
        let parent = Span::current();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let _entered = parent.enter();
                let outcome = body();
                match &outcome {
                    Ok(()) => info!(task = %task_name, "task exited"),
                    Err(err) => error!(task = %task_name, error = %err, "task failed"),
                }
                outcome
            })
            .with_context(|| format!("failed to spawn task {name}"))?;
        self.tasks.push((name, handle));
        Ok(())
    }

    /// Number of tasks started.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True when no task was started.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every task. All tasks are joined; the first failure is returned.
    pub fn join(self) -> Result<()> {
        let mut first_error = None;
        for (name, handle) in self.tasks {
            let outcome = handle
                .join()
                .map_err(|_| anyhow!("task {name} panicked"))
                .and_then(|result| result.with_context(|| format!("task {name} failed")));
            if let Err(err) = outcome {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn tasks_stop_when_signalled() {
        let signal = ShutdownSignal::new();
        let mut tasks = TaskSet::new();
        for id in 0..3 {
            let signal = signal.clone();
            tasks
                .spawn(format!("worker-{id}"), move || {
                    while !signal.is_triggered() {
                        thread::sleep(Duration::from_millis(1));
                    }
                    Ok(())
                })
                .expect("spawn");
        }
        assert_eq!(tasks.len(), 3);
        signal.trigger();
        tasks.join().expect("clean exit");
    }

    #[test]
    fn join_reports_failures_after_joining_everything() {
        let mut tasks = TaskSet::new();
        tasks.spawn("ok", || Ok(())).expect("spawn");
        tasks
            .spawn("broken", || Err(anyhow!("controller fault")))
            .expect("spawn");
        let err = tasks.join().unwrap_err();
        assert!(format!("{err:#}").contains("controller fault"));
        assert!(format!("{err:#}").contains("broken"));
    }
}
