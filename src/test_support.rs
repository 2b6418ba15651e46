//! Scripted collaborators for tests.
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;

use crate::agent::{Agent, ExecuteRequest, ExecuteResult};
use crate::cancel::RequestContext;
use crate::error::ControllerError;
use crate::status::{AgentUsage, TaskStatus, WorkflowMetrics, WorkflowPhase, WorkflowTask};
use crate::workflow::{WorkflowRunner, WorkflowSnapshot, WorkflowSummary};

type Responder = Box<dyn Fn(&ExecuteRequest) -> Result<String, ControllerError> + Send + Sync>;

pub struct FakeAgent {
    name: String,
    respond: Responder,
    latency: Duration,
    tokens: (u64, u64),
    calls: AtomicUsize,
}

impl FakeAgent {
    pub fn with(
        name: &str,
        respond: impl Fn(&ExecuteRequest) -> Result<String, ControllerError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            respond: Box::new(respond),
            latency: Duration::ZERO,
            tokens: (10, 5),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn replying(name: &str, reply: &str) -> Self {
        let reply = reply.to_string();
        Self::with(name, move |_| Ok(reply.clone()))
    }

    pub fn failing(name: &str, err: ControllerError) -> Self {
        Self::with(name, move |_| Err(err.clone()))
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn tokens(mut self, tokens_in: u64, tokens_out: u64) -> Self {
        self.tokens = (tokens_in, tokens_out);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for FakeAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        ctx: &RequestContext,
        req: ExecuteRequest,
    ) -> Result<ExecuteResult, ControllerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = self.latency;
        ctx.guard(async {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            Ok(())
        })
        .await?;
        let output = (self.respond)(&req)?;
        Ok(ExecuteResult {
            output,
            tokens_in: self.tokens.0,
            tokens_out: self.tokens.1,
        })
    }
}

/// Runner that answers every long operation with a finished two-task workflow
/// after `latency`, recording what it was asked to do.
pub struct FakeRunner {
    latency: Duration,
    calls: Mutex<Vec<String>>,
    metrics: WorkflowMetrics,
}

impl FakeRunner {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            calls: Mutex::new(Vec::new()),
            metrics: WorkflowMetrics {
                tokens_in: 100,
                tokens_out: 40,
                cost_usd: 0.01,
                usage: vec![AgentUsage {
                    agent: "claude".into(),
                    tokens_in: 100,
                    tokens_out: 40,
                }],
                ..Default::default()
            },
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: String) {
        if let Ok(mut c) = self.calls.lock() {
            c.push(call);
        }
    }

    fn snapshot(&self, prompt: &str) -> WorkflowSnapshot {
        let task = |id: &str| WorkflowTask {
            id: id.to_string(),
            description: format!("step {id}"),
            agent: Some("claude".into()),
            status: TaskStatus::Completed,
            output: Some("done".into()),
            error: None,
        };
        WorkflowSnapshot {
            id: "wf-test".into(),
            prompt: prompt.to_string(),
            status: WorkflowPhase::Done,
            stage: None,
            analysis: Vec::new(),
            tasks: vec![task("t1"), task("t2")],
            metrics: self.metrics.clone(),
            last_error: None,
            created_at: Local::now(),
            updated_at: Local::now(),
        }
    }

    async fn long_op(&self, ctx: &RequestContext, call: String, prompt: &str) -> Result<WorkflowSnapshot, ControllerError> {
        self.record(call);
        let latency = self.latency;
        ctx.guard(async {
            tokio::time::sleep(latency).await;
            Ok(())
        })
        .await?;
        Ok(self.snapshot(prompt))
    }
}

#[async_trait]
impl WorkflowRunner for FakeRunner {
    async fn run(&self, ctx: &RequestContext, prompt: &str) -> Result<WorkflowSnapshot, ControllerError> {
        self.long_op(ctx, format!("run {prompt}"), prompt).await
    }

    async fn analyze(&self, ctx: &RequestContext, prompt: &str) -> Result<WorkflowSnapshot, ControllerError> {
        self.long_op(ctx, format!("analyze {prompt}"), prompt).await
    }

    async fn plan(&self, ctx: &RequestContext, prompt: &str) -> Result<WorkflowSnapshot, ControllerError> {
        self.long_op(ctx, format!("plan {prompt}"), prompt).await
    }

    async fn replan(&self, ctx: &RequestContext, feedback: &str) -> Result<WorkflowSnapshot, ControllerError> {
        self.long_op(ctx, format!("replan {feedback}"), "replanned").await
    }

    async fn use_plan(&self, ctx: &RequestContext, id: &str) -> Result<WorkflowSnapshot, ControllerError> {
        self.long_op(ctx, format!("use_plan {id}"), id).await
    }

    async fn resume(&self, ctx: &RequestContext) -> Result<WorkflowSnapshot, ControllerError> {
        self.long_op(ctx, "resume".into(), "resumed").await
    }

    async fn get_state(&self) -> Result<Option<WorkflowSnapshot>, ControllerError> {
        self.record("get_state".into());
        Ok(None)
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowSummary>, ControllerError> {
        self.record("list_workflows".into());
        Ok(vec![self.snapshot("stored").summary()])
    }

    async fn load_workflow(&self, id: &str) -> Result<WorkflowSnapshot, ControllerError> {
        self.record(format!("load_workflow {id}"));
        let mut snap = self.snapshot("loaded");
        snap.id = id.to_string();
        snap.status = WorkflowPhase::Idle;
        Ok(snap)
    }

    async fn deactivate_workflow(&self) -> Result<(), ControllerError> {
        self.record("deactivate_workflow".into());
        Ok(())
    }

    async fn archive_workflows(&self) -> Result<usize, ControllerError> {
        self.record("archive_workflows".into());
        Ok(1)
    }

    async fn purge_all_workflows(&self) -> Result<usize, ControllerError> {
        self.record("purge_all_workflows".into());
        Ok(2)
    }

    async fn delete_workflow(&self, id: &str) -> Result<(), ControllerError> {
        self.record(format!("delete_workflow {id}"));
        Ok(())
    }
}
