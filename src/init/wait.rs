// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};
use tower::BoxError;
use tracing::error;

pub type TaskResult = Result<(), BoxError>;

/// Wait until any task in the set finishes and return its result.
pub async fn wait_for_any_task(tasks: &mut JoinSet<TaskResult>) -> TaskResult {
    match tasks.join_next().await {
        // Empty set
        None => Ok(()),
        Some(res) => res?,
    }
}

/// Wait for every task in the set, giving up after `timeout`. The last task
/// error, if any, is returned.
pub async fn wait_for_tasks_with_timeout(
    tasks: &mut JoinSet<TaskResult>,
    timeout: Duration,
) -> TaskResult {
    let stop_at = Instant::now() + timeout;
    let mut result = Ok(());
    loop {
        match timeout_at(stop_at, tasks.join_next()).await {
            Err(_) => {
                result = Err("timed out waiting for tasks to complete".into());
                break;
            }
            Ok(None) => break,
            Ok(Some(Ok(Ok(())))) => {}
            Ok(Some(Ok(Err(e)))) => result = Err(e),
            Ok(Some(Err(e))) => error!("Failed to join with task: {:?}", e),
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_any_task_returns_first_result() {
        let mut tasks: JoinSet<TaskResult> = JoinSet::new();
        tasks.spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });
        tasks.spawn(async { Err("boom".into()) });

        let res = wait_for_any_task(&mut tasks).await;
        assert_eq!(res.unwrap_err().to_string(), "boom");
    }

    #[tokio::test]
    async fn test_wait_all_times_out() {
        let mut tasks: JoinSet<TaskResult> = JoinSet::new();
        tasks.spawn(async { Ok(()) });
        tasks.spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });

        let res = wait_for_tasks_with_timeout(&mut tasks, Duration::from_millis(50)).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn test_wait_all_keeps_task_error() {
        let mut tasks: JoinSet<TaskResult> = JoinSet::new();
        tasks.spawn(async { Err("failed".into()) });
        tasks.spawn(async { Ok(()) });

        let res = wait_for_tasks_with_timeout(&mut tasks, Duration::from_secs(5)).await;
        assert_eq!(res.unwrap_err().to_string(), "failed");
    }
}
