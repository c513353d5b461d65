//! Bounded concurrent dispatch to a set of agents.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use grpc_client::{CallContext, CallError};
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::timeout_at;
use tonic::Code;
use tracing::warn;

use crate::agent::Dispatchable;
use crate::models::AgentFailure;

/// What one agent returned for one fan-out.
#[derive(Debug)]
pub(crate) struct DispatchResult<T> {
    pub address: String,
    pub outcome: Result<T, AgentFailure>,
}

/// First agent to report a hit, plus what the others said before it won.
#[derive(Debug)]
pub(crate) struct FirstMatch<T> {
    pub found: Option<T>,
    /// Agents that answered, hit or not.
    pub answered: usize,
    pub failures: Vec<AgentFailure>,
}

#[derive(Debug, Clone)]
pub(crate) struct Fanout {
    concurrency: usize,
    agent_timeout: Duration,
}

/// Running branches and the agent each one belongs to.
struct Branches<T> {
    tasks: JoinSet<Result<T, CallError>>,
    owners: HashMap<Id, String>,
}

impl<T: Send + 'static> Branches<T> {
    fn failure_for(&mut self, err: JoinError) -> AgentFailure {
        let address = self.owners.remove(&err.id()).unwrap_or_default();
        let message = if err.is_panic() {
            "agent task panicked"
        } else {
            "agent task cancelled"
        };
        AgentFailure::new(address, Code::Internal, message)
    }

    /// Next finished branch, or `None` once all are done or the deadline passed.
    async fn next(&mut self, deadline: Option<tokio::time::Instant>) -> Option<DispatchResult<T>> {
        let joined = match deadline {
            Some(deadline) => timeout_at(deadline, self.tasks.join_next_with_id())
                .await
                .ok()??,
            None => self.tasks.join_next_with_id().await?,
        };
        Some(match joined {
            Ok((id, outcome)) => {
                let address = self.owners.remove(&id).unwrap_or_default();
                let outcome = outcome.map_err(|err| AgentFailure::from_call(&address, &err));
                DispatchResult { address, outcome }
            }
            Err(err) => {
                let failure = self.failure_for(err);
                DispatchResult {
                    address: failure.address.clone(),
                    outcome: Err(failure),
                }
            }
        })
    }

    /// Abort what is still running and report it as having missed the deadline.
    fn abandon(mut self) -> Vec<AgentFailure> {
        self.tasks.abort_all();
        let mut missed: Vec<AgentFailure> = self
            .owners
            .drain()
            .map(|(_, address)| {
                AgentFailure::new(
                    address,
                    Code::DeadlineExceeded,
                    "operation deadline passed before the agent answered",
                )
            })
            .collect();
        missed.sort_by(|a, b| a.address.cmp(&b.address));
        missed
    }
}

impl Fanout {
    pub fn new(concurrency: usize, agent_timeout: Duration) -> Self {
        Self {
            concurrency: concurrency.max(1),
            agent_timeout,
        }
    }

    /// Each branch waits for a worker slot, then runs with a deadline no later
    /// than the operation's.
    fn spawn<T, F, Fut>(
        &self,
        ctx: &CallContext,
        agents: Vec<Arc<dyn Dispatchable>>,
        op: F,
    ) -> Branches<T>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn Dispatchable>, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, CallError>> + Send + 'static,
    {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let op = Arc::new(op);
        let mut branches = Branches {
            tasks: JoinSet::new(),
            owners: HashMap::with_capacity(agents.len()),
        };

        for agent in agents {
            let address = agent.address().to_string();
            let permits = permits.clone();
            let op = op.clone();
            let parent = ctx.clone();
            let agent_timeout = self.agent_timeout;

            let handle = branches.tasks.spawn(async move {
                // The semaphore is never closed.
                let _permit = permits.acquire_owned().await.ok();
                let ctx = parent.narrowed(agent_timeout);
                op(agent, ctx).await
            });
            branches.owners.insert(handle.id(), address);
        }
        branches
    }

    /// Run `op` on every agent and collect every outcome, sorted by address.
    ///
    /// When the operation deadline passes, branches still running are aborted
    /// and reported as `DeadlineExceeded`.
    pub async fn broadcast<T, F, Fut>(
        &self,
        ctx: &CallContext,
        agents: Vec<Arc<dyn Dispatchable>>,
        op: F,
    ) -> Vec<DispatchResult<T>>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn Dispatchable>, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, CallError>> + Send + 'static,
    {
        let total = agents.len();
        let mut branches = self.spawn(ctx, agents, op);
        let mut results = Vec::with_capacity(total);

        while let Some(result) = branches.next(ctx.deadline).await {
            results.push(result);
        }

        let missed = branches.abandon();
        if !missed.is_empty() {
            warn!(missed = missed.len(), total, "Operation deadline cut the fan-out short");
        }
        results.extend(missed.into_iter().map(|failure| DispatchResult {
            address: failure.address.clone(),
            outcome: Err(failure),
        }));
        results.sort_by(|a, b| a.address.cmp(&b.address));
        results
    }

    /// Run `op` on every agent until one returns `Some`; the rest are aborted.
    pub async fn first_match<T, F, Fut>(
        &self,
        ctx: &CallContext,
        agents: Vec<Arc<dyn Dispatchable>>,
        op: F,
    ) -> FirstMatch<T>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn Dispatchable>, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<T>, CallError>> + Send + 'static,
    {
        let mut branches = self.spawn(ctx, agents, op);
        let mut outcome = FirstMatch {
            found: None,
            answered: 0,
            failures: Vec::new(),
        };

        while let Some(result) = branches.next(ctx.deadline).await {
            match result.outcome {
                Ok(Some(value)) => {
                    outcome.answered += 1;
                    outcome.found = Some(value);
                    break;
                }
                Ok(None) => outcome.answered += 1,
                Err(failure) => outcome.failures.push(failure),
            }
        }

        let missed = branches.abandon();
        if outcome.found.is_none() {
            outcome.failures.extend(missed);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::service::tests::{FakeAgent, agents};

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_collects_every_agent_sorted() {
        let fanout = Fanout::new(8, Duration::from_secs(1));
        let pool = agents(vec![
            FakeAgent::new("c:1").with_delay(Duration::from_millis(30)),
            FakeAgent::new("a:1").with_delay(Duration::from_millis(20)),
            FakeAgent::new("b:1").failing(Code::Unavailable),
        ]);

        let results = fanout
            .broadcast(&CallContext::new(), pool, |agent, ctx| async move {
                agent.exists(&ctx, "x").await
            })
            .await;

        let addresses: Vec<_> = results.iter().map(|r| r.address.as_str()).collect();
        assert_eq!(addresses, ["a:1", "b:1", "c:1"]);
        assert!(results[0].outcome.is_ok());
        assert_eq!(results[1].outcome.as_ref().unwrap_err().code, Code::Unavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let fanout = Fanout::new(2, Duration::from_secs(5));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let pool = agents((0..6).map(|i| FakeAgent::new(format!("a{i}:1"))).collect());

        let (r, p) = (running.clone(), peak.clone());
        let results = fanout
            .broadcast(&CallContext::new(), pool, move |_agent, _ctx| {
                let (running, peak) = (r.clone(), p.clone());
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, CallError>(())
                }
            })
            .await;

        assert_eq!(results.len(), 6);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_deadline_aborts_stragglers() {
        let fanout = Fanout::new(8, Duration::from_secs(60));
        let pool = agents(vec![
            FakeAgent::new("fast:1"),
            FakeAgent::new("slow:1").with_delay(Duration::from_secs(30)),
        ]);
        let ctx = CallContext::new().with_timeout(Duration::from_millis(100));

        let results = fanout
            .broadcast(&ctx, pool, |agent, ctx| async move {
                agent.exists(&ctx, "x").await
            })
            .await;

        assert!(results[0].outcome.is_ok());
        let missed = results[1].outcome.as_ref().unwrap_err();
        assert_eq!(results[1].address, "slow:1");
        assert_eq!(missed.code, Code::DeadlineExceeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_branch_deadline_never_exceeds_operation_deadline() {
        let fanout = Fanout::new(8, Duration::from_secs(60));
        let pool = agents(vec![FakeAgent::new("a:1")]);
        let ctx = CallContext::new().with_timeout(Duration::from_millis(500));
        let op_deadline = ctx.deadline.unwrap();

        let results = fanout
            .broadcast(&ctx, pool, move |_agent, ctx| async move {
                Ok::<_, CallError>(ctx.deadline.unwrap() <= op_deadline)
            })
            .await;
        assert!(results[0].outcome.as_ref().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_branch_is_internal() {
        let fanout = Fanout::new(8, Duration::from_secs(1));
        let pool = agents(vec![FakeAgent::new("boom:1")]);

        let results = fanout
            .broadcast(&CallContext::new(), pool, |_agent, _ctx| async move {
                if true {
                    panic!("agent handler bug");
                }
                Ok::<(), CallError>(())
            })
            .await;
        let failure = results[0].outcome.as_ref().unwrap_err();
        assert_eq!(failure.address, "boom:1");
        assert_eq!(failure.code, Code::Internal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_match_stops_early() {
        let fanout = Fanout::new(8, Duration::from_secs(60));
        let pool = agents(vec![
            FakeAgent::new("a:1"),
            FakeAgent::new("b:1")
                .with_object("x", vec![1.0])
                .with_delay(Duration::from_millis(10)),
            FakeAgent::new("c:1").with_delay(Duration::from_secs(30)),
        ]);

        let started = tokio::time::Instant::now();
        let outcome = fanout
            .first_match(&CallContext::new(), pool, |agent, ctx| async move {
                agent.get_object(&ctx, "x").await
            })
            .await;

        assert_eq!(outcome.found.unwrap().vector, vec![1.0]);
        assert_eq!(outcome.answered, 2);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_first_match_without_hit_reports_failures() {
        let fanout = Fanout::new(8, Duration::from_secs(1));
        let pool = agents(vec![
            FakeAgent::new("a:1"),
            FakeAgent::new("b:1").failing(Code::Unavailable),
        ]);

        let outcome = fanout
            .first_match(&CallContext::new(), pool, |agent, ctx| async move {
                agent.get_object(&ctx, "x").await
            })
            .await;

        assert!(outcome.found.is_none());
        assert_eq!(outcome.answered, 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].address, "b:1");
    }
}
