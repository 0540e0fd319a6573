use serde::Serialize;
use std::fmt::Display;
use std::time::Duration;

/// Failure of a single batch item. Systemic failures (expired session, CSRF,
/// missing permission) would repeat for every later item too.
pub trait ItemError: Display {
    fn is_systemic(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct BatchPolicy {
    pub abort_on_first_item_systemic_failure: bool,
    pub delay: Duration,
}

impl BatchPolicy {
    /// Grade saves and publishes: every item is attempted.
    pub fn isolate_all() -> Self {
        BatchPolicy {
            abort_on_first_item_systemic_failure: false,
            delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub index: usize,
    pub total: usize,
    pub percent: u32,
    pub current: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemFailure {
    pub index: usize,
    pub label: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub total: usize,
    pub processed: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub failures: Vec<ItemFailure>,
    pub aborted: bool,
    pub abort_reason: Option<String>,
}

impl BatchReport {
    pub fn failed(&self, index: usize) -> Option<&ItemFailure> {
        self.failures.iter().find(|f| f.index == index)
    }
}

fn percent_of(index: usize, total: usize) -> u32 {
    if total == 0 {
        return 100;
    }
    ((index as f64 / total as f64) * 100.0).round() as u32
}

/// Runs `task` over `items` one at a time. Progress is reported before each
/// item and once more at completion. Failures are isolated and counted;
/// only a systemic failure of the first item stops the run, and only when
/// the policy asks for it.
pub fn run_batch<T, E, L, F, P>(
    items: &[T],
    policy: &BatchPolicy,
    label: L,
    mut task: F,
    mut on_progress: P,
) -> BatchReport
where
    E: ItemError,
    L: Fn(&T) -> String,
    F: FnMut(&T) -> Result<(), E>,
    P: FnMut(&Progress),
{
    let total = items.len();
    let mut report = BatchReport {
        total,
        ..BatchReport::default()
    };

    for (i, item) in items.iter().enumerate() {
        let item_label = label(item);
        on_progress(&Progress {
            index: i,
            total,
            percent: percent_of(i, total),
            current: item_label.clone(),
        });

        report.processed += 1;
        match task(item) {
            Ok(()) => report.success_count += 1,
            Err(e) => {
                report.error_count += 1;
                let message = e.to_string();
                tracing::warn!(index = i, item = %item_label, error = %message, "batch item failed");
                report.failures.push(ItemFailure {
                    index: i,
                    label: item_label,
                    message: message.clone(),
                });
                if i == 0 && e.is_systemic() && policy.abort_on_first_item_systemic_failure {
                    tracing::warn!(error = %message, "aborting batch on first-item failure");
                    report.aborted = true;
                    report.abort_reason = Some(message);
                    return report;
                }
            }
        }

        if i + 1 < total && !policy.delay.is_zero() {
            std::thread::sleep(policy.delay);
        }
    }

    on_progress(&Progress {
        index: total,
        total,
        percent: 100,
        current: "Complete".to_string(),
    });
    tracing::info!(
        total,
        success = report.success_count,
        errors = report.error_count,
        "batch complete"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::time::Instant;

    #[derive(Debug)]
    struct Failure {
        systemic: bool,
    }

    impl Display for Failure {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            if self.systemic {
                write!(f, "session expired")
            } else {
                write!(f, "rejected")
            }
        }
    }

    impl ItemError for Failure {
        fn is_systemic(&self) -> bool {
            self.systemic
        }
    }

    fn policy(abort: bool) -> BatchPolicy {
        BatchPolicy {
            abort_on_first_item_systemic_failure: abort,
            delay: Duration::ZERO,
        }
    }

    #[test]
    fn isolates_failures_and_reports_progress() {
        let items = vec![1, 2, 3, 4];
        let mut trail = Vec::new();
        let report = run_batch(
            &items,
            &policy(true),
            |n| format!("item {}", n),
            |n| {
                if n % 2 == 0 {
                    Err(Failure { systemic: false })
                } else {
                    Ok(())
                }
            },
            |p| trail.push((p.percent, p.current.clone())),
        );
        assert_eq!(report.processed, 4);
        assert_eq!(report.success_count, 2);
        assert_eq!(report.error_count, 2);
        assert!(!report.aborted);
        assert_eq!(report.failures[0].label, "item 2");
        assert_eq!(report.failures[1].index, 3);
        let percents: Vec<u32> = trail.iter().map(|(p, _)| *p).collect();
        assert_eq!(percents, vec![0, 25, 50, 75, 100]);
        assert_eq!(trail.last().map(|(_, c)| c.as_str()), Some("Complete"));
    }

    #[test]
    fn systemic_failure_on_first_item_aborts() {
        let calls = RefCell::new(0);
        let report = run_batch(
            &[1, 2, 3],
            &policy(true),
            |n| n.to_string(),
            |_| {
                *calls.borrow_mut() += 1;
                Err(Failure { systemic: true })
            },
            |_| {},
        );
        assert_eq!(*calls.borrow(), 1);
        assert!(report.aborted);
        assert_eq!(report.processed, 1);
        assert_eq!(report.error_count, 1);
        assert_eq!(report.abort_reason.as_deref(), Some("session expired"));
    }

    #[test]
    fn systemic_failure_later_is_only_counted() {
        let report = run_batch(
            &[1, 2, 3],
            &policy(true),
            |n| n.to_string(),
            |n| {
                if *n == 2 {
                    Err(Failure { systemic: true })
                } else {
                    Ok(())
                }
            },
            |_| {},
        );
        assert!(!report.aborted);
        assert_eq!(report.success_count, 2);
        assert_eq!(report.error_count, 1);
    }

    #[test]
    fn abort_policy_off_keeps_going() {
        let report = run_batch(
            &[1, 2],
            &policy(false),
            |n| n.to_string(),
            |_| Err::<(), _>(Failure { systemic: true }),
            |_| {},
        );
        assert!(!report.aborted);
        assert_eq!(report.error_count, 2);
    }

    #[test]
    fn delay_is_only_between_items() {
        let delayed = BatchPolicy {
            abort_on_first_item_systemic_failure: true,
            delay: Duration::from_millis(30),
        };
        let started = Instant::now();
        run_batch(
            &[1],
            &delayed,
            |n| n.to_string(),
            |_| Ok::<(), Failure>(()),
            |_| {},
        );
        assert!(started.elapsed() < Duration::from_millis(30));

        let started = Instant::now();
        run_batch(
            &[1, 2, 3],
            &delayed,
            |n| n.to_string(),
            |_| Ok::<(), Failure>(()),
            |_| {},
        );
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn empty_batch_completes_immediately() {
        let mut trail = Vec::new();
        let report = run_batch(
            &Vec::<i32>::new(),
            &policy(true),
            |n| n.to_string(),
            |_| Ok::<(), Failure>(()),
            |p| trail.push(p.clone()),
        );
        assert_eq!(report.total, 0);
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].percent, 100);
    }
}
