//! 并发分发模块
//!
//! 将同一个异步函数按主机参数扇出执行，结果按完成顺序返回。
//! 支持并发上限、单任务超时与整体取消；单个任务失败（包括 panic）
//! 只体现在它自己的结果中，不影响其他任务

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// 并发配置
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyConfig {
    /// 同时执行的任务上限（0 表示每个任务一个 worker，不排队）
    pub max_concurrency: usize,
    /// 单个任务的执行期限，从获得许可开始计时（None 表示不限制）
    pub task_timeout: Option<Duration>,
}

impl ConcurrencyConfig {
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = limit;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }
}

/// 分发错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("task timed out after {0:?}")]
    TimedOut(Duration),

    #[error("task cancelled")]
    Cancelled,

    #[error("semaphore closed")]
    Closed,
}

/// 单个任务的结果
#[derive(Debug)]
pub struct TaskOutcome<T> {
    /// 任务的提交序号
    pub index: usize,
    pub result: Result<T, DispatchError>,
}

impl<T> TaskOutcome<T> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// 扇出执行器
#[derive(Clone)]
pub struct Dispatcher {
    semaphore: Option<Arc<Semaphore>>,
    config: ConcurrencyConfig,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(config: ConcurrencyConfig) -> Self {
        let semaphore = match config.max_concurrency {
            0 => None,
            limit => Some(Arc::new(Semaphore::new(limit))),
        };

        Self {
            semaphore,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// 获取配置（只读）
    pub fn config(&self) -> &ConcurrencyConfig {
        &self.config
    }

    /// 取消令牌，触发后所有未完成的任务返回 Cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// 为每个参数启动一个任务，通过返回的 Completions 按完成顺序获取结果
    pub fn spawn<A, T, F, Fut>(&self, func: F, tasks: Vec<A>) -> Completions<T>
    where
        A: Send + 'static,
        T: Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let run_id = Uuid::new_v4();
        let total = tasks.len();
        let mut join_set = JoinSet::new();
        let mut indices = HashMap::with_capacity(total);

        if total > 0 {
            debug!(
                run_id = %run_id,
                tasks = total,
                max_concurrency = self.config.max_concurrency,
                "Dispatching tasks"
            );
        }

        let func = Arc::new(func);
        for (index, args) in tasks.into_iter().enumerate() {
            let func = func.clone();
            let semaphore = self.semaphore.clone();
            let cancel = self.cancel.clone();
            let deadline = self.config.task_timeout;

            let handle = join_set.spawn(async move {
                let result = run_task(func, args, semaphore, cancel, deadline).await;
                (index, result)
            });
            indices.insert(handle.id(), index);
        }

        Completions {
            join_set,
            indices,
            total,
            run_id,
        }
    }

    /// 执行全部任务并按完成顺序返回结果；空任务列表直接返回
    pub async fn dispatch<A, T, F, Fut>(&self, func: F, tasks: Vec<A>) -> Vec<TaskOutcome<T>>
    where
        A: Send + 'static,
        T: Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        if tasks.is_empty() {
            return Vec::new();
        }
        self.spawn(func, tasks).collect_all().await
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(ConcurrencyConfig::default())
    }
}

async fn run_task<A, T, F, Fut>(
    func: Arc<F>,
    args: A,
    semaphore: Option<Arc<Semaphore>>,
    cancel: CancellationToken,
    deadline: Option<Duration>,
) -> Result<T, DispatchError>
where
    F: Fn(A) -> Fut,
    Fut: Future<Output = T>,
{
    if cancel.is_cancelled() {
        return Err(DispatchError::Cancelled);
    }

    let _permit = match semaphore {
        Some(semaphore) => tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DispatchError::Cancelled),
            permit = semaphore.acquire_owned() => Some(permit.map_err(|_| DispatchError::Closed)?),
        },
        None => None,
    };

    let work = AssertUnwindSafe((*func)(args)).catch_unwind();
    let guarded = async {
        let caught = match deadline {
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(caught) => caught,
                Err(_) => return Err(DispatchError::TimedOut(limit)),
            },
            None => work.await,
        };
        caught.map_err(|payload| DispatchError::Panicked(panic_message(payload.as_ref())))
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DispatchError::Cancelled),
        result = guarded => result,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn join_failure(error: JoinError) -> DispatchError {
    if error.is_panic() {
        DispatchError::Panicked(panic_message(error.into_panic().as_ref()))
    } else {
        DispatchError::Cancelled
    }
}

/// 正在执行的一批任务
pub struct Completions<T> {
    join_set: JoinSet<(usize, Result<T, DispatchError>)>,
    /// 任务 id 到提交序号的映射，任务异常退出时用于还原序号
    indices: HashMap<Id, usize>,
    total: usize,
    run_id: Uuid,
}

impl<T: Send + 'static> Completions<T> {
    /// 提交的任务总数
    pub fn total(&self) -> usize {
        self.total
    }

    /// 等待下一个完成的任务，全部返回后为 None
    pub async fn next(&mut self) -> Option<TaskOutcome<T>> {
        loop {
            let (id, index, result) = match self.join_set.join_next_with_id().await? {
                Ok((id, (index, result))) => (id, index, result),
                // panic 已在任务内部捕获，这里只会在任务被中止或运行时关闭时出现
                Err(e) => {
                    error!(run_id = %self.run_id, error = %e, "Task join failed");
                    let id = e.id();
                    let Some(&index) = self.indices.get(&id) else {
                        continue;
                    };
                    (id, index, Err(join_failure(e)))
                }
            };
            self.indices.remove(&id);

            if let Err(e) = &result {
                warn!(run_id = %self.run_id, index, error = %e, "Task failed");
            }
            return Some(TaskOutcome { index, result });
        }
    }

    /// 收集全部结果（完成顺序）
    pub async fn collect_all(mut self) -> Vec<TaskOutcome<T>> {
        let mut outcomes = Vec::with_capacity(self.total);
        while let Some(outcome) = self.next().await {
            outcomes.push(outcome);
        }
        debug!(run_id = %self.run_id, completed = outcomes.len(), "All tasks collected");
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_empty_tasks() {
        let dispatcher = Dispatcher::default();
        let outcomes = dispatcher
            .dispatch(|n: u32| async move { n }, Vec::new())
            .await;
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let dispatcher = Dispatcher::default();
        let outcomes = dispatcher
            .dispatch(
                |n: u32| async move {
                    if n == 2 {
                        panic!("boom on {}", n);
                    }
                    n * 10
                },
                (0..5).collect(),
            )
            .await;

        assert_eq!(outcomes.len(), 5);
        for outcome in outcomes {
            if outcome.index == 2 {
                match outcome.result {
                    Err(DispatchError::Panicked(msg)) => assert!(msg.contains("boom on 2")),
                    other => panic!("unexpected outcome: {:?}", other),
                }
            } else {
                assert_eq!(outcome.result.unwrap(), outcome.index as u32 * 10);
            }
        }
    }

    #[tokio::test]
    async fn test_errors_stay_in_task_result() {
        let dispatcher = Dispatcher::default();
        let outcomes = dispatcher
            .dispatch(
                |n: u32| async move {
                    if n % 2 == 0 {
                        Ok(n)
                    } else {
                        Err(format!("odd {}", n))
                    }
                },
                vec![1, 2, 3, 4],
            )
            .await;

        let failed = outcomes
            .iter()
            .filter(|o| matches!(o.result, Ok(Err(_))))
            .count();
        assert_eq!(failed, 2);
    }

    #[tokio::test]
    async fn test_completion_order() {
        let dispatcher = Dispatcher::default();
        let outcomes = dispatcher
            .dispatch(
                |delay_ms: u64| async move {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    delay_ms
                },
                vec![400, 20, 200],
            )
            .await;

        let order: Vec<usize> = outcomes.iter().map(|o| o.index).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[tokio::test]
    async fn test_max_concurrency() {
        let dispatcher = Dispatcher::new(ConcurrencyConfig::default().with_max_concurrency(2));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (in_flight_c, peak_c) = (in_flight.clone(), peak.clone());
        let outcomes = dispatcher
            .dispatch(
                move |_: usize| {
                    let in_flight = in_flight_c.clone();
                    let peak = peak_c.clone();
                    async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    }
                },
                (0..6).collect(),
            )
            .await;

        assert_eq!(outcomes.len(), 6);
        assert!(outcomes.iter().all(|o| o.is_ok()));
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_task_timeout() {
        let dispatcher = Dispatcher::new(
            ConcurrencyConfig::default().with_task_timeout(Duration::from_millis(100)),
        );
        let outcomes = dispatcher
            .dispatch(
                |delay_ms: u64| async move {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    delay_ms
                },
                vec![5_000, 10],
            )
            .await;

        assert_eq!(outcomes.len(), 2);
        let slow = outcomes.iter().find(|o| o.index == 0).unwrap();
        assert_eq!(slow.result, Err(DispatchError::TimedOut(Duration::from_millis(100))));
        let fast = outcomes.iter().find(|o| o.index == 1).unwrap();
        assert_eq!(fast.result, Ok(10));
    }

    #[tokio::test]
    async fn test_cancel_unfinished_tasks() {
        let dispatcher = Dispatcher::default();
        let mut completions = dispatcher.spawn(
            |delay_ms: u64| async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms
            },
            vec![10, 10_000, 10_000],
        );
        assert_eq!(completions.total(), 3);

        let first = completions.next().await.unwrap();
        assert_eq!(first.index, 0);
        assert_eq!(first.result, Ok(10));

        dispatcher.cancel();
        let rest = completions.collect_all().await;
        assert_eq!(rest.len(), 2);
        assert!(rest.iter().all(|o| o.result == Err(DispatchError::Cancelled)));
    }

    #[tokio::test]
    async fn test_aborted_tasks_still_yield_outcomes() {
        let dispatcher = Dispatcher::default();
        let mut completions = dispatcher.spawn(
            |delay_ms: u64| async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms
            },
            vec![10_000, 10_000, 10_000],
        );
        completions.join_set.abort_all();

        let outcomes = completions.collect_all().await;
        let mut indices: Vec<usize> = outcomes.iter().map(|o| o.index).collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(outcomes.iter().all(|o| o.result == Err(DispatchError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_permit() {
        let dispatcher = Dispatcher::new(ConcurrencyConfig::default().with_max_concurrency(1));
        let completions = dispatcher.spawn(
            |delay_ms: u64| async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            },
            vec![10_000, 10_000],
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        dispatcher.cancel();

        let outcomes = completions.collect_all().await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.result == Err(DispatchError::Cancelled)));
    }
}
