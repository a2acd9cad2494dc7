//! Spawn-then-join-all task group for per-child units of work.
//!
//! Units are launched eagerly on the runtime and joined with a single
//! barrier. A failing or panicking unit never cancels its siblings; every
//! outcome is collected so partial results stay informative.

use std::future::Future;

use tokio::task::JoinSet;
use tracing::{Instrument, error};

use crate::error::{Error, Result};

/// Outcome of one unit, tagged with the label it was spawned under
#[derive(Debug)]
pub struct UnitResult<T> {
    pub label: String,
    pub result: Result<T>,
}

pub struct FanOut<T> {
    set: JoinSet<(String, Result<T>)>,
    spawned: usize,
}

impl<T: Send + 'static> FanOut<T> {
    pub fn new() -> Self {
        Self {
            set: JoinSet::new(),
            spawned: 0,
        }
    }

    /// Launch a unit immediately
    pub fn spawn<F>(&mut self, label: impl Into<String>, unit: F)
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let label = label.into();
        self.spawned += 1;
        self.set
            .spawn(async move { (label, unit.await) }.in_current_span());
    }

    pub fn len(&self) -> usize {
        self.spawned
    }

    pub fn is_empty(&self) -> bool {
        self.spawned == 0
    }

    /// Wait for every unit and return all outcomes in completion order
    pub async fn join_all(mut self) -> Vec<UnitResult<T>> {
        let mut results = Vec::with_capacity(self.spawned);

        while let Some(joined) = self.set.join_next().await {
            match joined {
                Ok((label, result)) => results.push(UnitResult { label, result }),
                Err(join_err) => {
                    // The label travels inside the task, so a panicked unit
                    // is reported anonymously
                    error!(error = %join_err, "unit of work panicked");
                    results.push(UnitResult {
                        label: String::from("<panicked>"),
                        result: Err(Error::Other(format!("unit of work failed: {}", join_err))),
                    });
                }
            }
        }

        results
    }
}

impl<T: Send + 'static> Default for FanOut<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_collects_every_outcome() {
        let mut group = FanOut::new();
        for i in 0..10u32 {
            group.spawn(format!("unit-{}", i), async move {
                if i % 3 == 0 {
                    Err(Error::transient(format!("unit {} failed", i)))
                } else {
                    Ok(i)
                }
            });
        }
        assert_eq!(group.len(), 10);

        let results = group.join_all().await;
        assert_eq!(results.len(), 10);
        let failures = results.iter().filter(|r| r.result.is_err()).count();
        assert_eq!(failures, 4);
    }

    #[tokio::test]
    async fn test_panic_does_not_lose_siblings() {
        let mut group = FanOut::new();
        group.spawn("ok", async { Ok(1) });
        group.spawn("boom", async {
            if true {
                panic!("unit exploded");
            }
            Ok(2)
        });

        let results = group.join_all().await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().any(|r| r.label == "ok" && r.result.is_ok()));
        assert!(results.iter().any(|r| r.result.is_err()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_units_run_concurrently() {
        let start = tokio::time::Instant::now();
        let mut group = FanOut::new();
        for _ in 0..50 {
            group.spawn("sleeper", async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            });
        }

        group.join_all().await;
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_empty_group_joins_immediately() {
        let group: FanOut<()> = FanOut::new();
        assert!(group.is_empty());
        assert!(group.join_all().await.is_empty());
    }
}
