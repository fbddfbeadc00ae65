//! End-to-end tests for the convergence poller
//!
//! A scripted orchestrator replays one snapshot per tick (repeating the last
//! one), and the tokio clock runs paused so stabilization windows elapse
//! instantly.

use async_trait::async_trait;
use converge::client::{ClientError, OrchestratorClient, TaskFilter};
use converge::model::{
    Node, NodeState, NodeStatus, Service, ServiceMode, ServiceSpec, Task, TaskState, TaskStatus,
    UpdateConfig, UpdateState, UpdateStatus,
};
use converge::progress::{service_progress, PollOptions, ProgressError, RecordingSink};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const OVERALL: &str = "overall progress";

#[derive(Clone)]
struct Frame {
    service: Service,
    tasks: Vec<Task>,
    nodes: Vec<Node>,
}

#[derive(Default)]
struct ScriptedClient {
    frames: Vec<Frame>,
    current: AtomicUsize,
    service_calls: AtomicUsize,
    task_calls: AtomicUsize,
    fail_nodes: bool,
    hang_tasks: bool,
}

impl ScriptedClient {
    fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames,
            ..Default::default()
        }
    }

    fn frame(&self) -> &Frame {
        &self.frames[self.current.load(Ordering::SeqCst)]
    }

    fn service_calls(&self) -> usize {
        self.service_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OrchestratorClient for ScriptedClient {
    async fn get_service(&self, service_id: &str) -> Result<Service, ClientError> {
        let call = self.service_calls.fetch_add(1, Ordering::SeqCst);
        let index = call.min(self.frames.len() - 1);
        self.current.store(index, Ordering::SeqCst);
        assert_eq!(self.frames[index].service.id, service_id);
        Ok(self.frames[index].service.clone())
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, ClientError> {
        self.task_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_tasks {
            std::future::pending::<()>().await;
        }
        assert!(filter.up_to_date);
        assert_eq!(filter.service_id, self.frame().service.id);
        Ok(self.frame().tasks.clone())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, ClientError> {
        if self.fail_nodes {
            return Err(ClientError::Status {
                status: 503,
                message: "manager unavailable".to_string(),
            });
        }
        Ok(self.frame().nodes.clone())
    }
}

fn service(mode: ServiceMode, state: Option<(UpdateState, &str)>) -> Service {
    Service {
        id: "web".to_string(),
        spec: ServiceSpec {
            name: "web".to_string(),
            mode,
            update_config: None,
        },
        update_status: state.map(|(state, message)| UpdateStatus {
            state,
            message: message.to_string(),
        }),
    }
}

fn with_monitor(mut service: Service, monitor: Duration) -> Service {
    service.spec.update_config = Some(UpdateConfig { monitor });
    service
}

fn task(slot: u64, node: &str, observed: TaskState) -> Task {
    Task {
        id: format!("t{slot}-{node}"),
        service_id: "web".to_string(),
        node_id: node.to_string(),
        slot,
        desired_state: TaskState::Running,
        status: TaskStatus {
            state: observed,
            ..Default::default()
        },
    }
}

fn replicas(count: u64, observed: TaskState) -> Vec<Task> {
    (1..=count).map(|slot| task(slot, "node-a", observed.clone())).collect()
}

fn ready(ids: &[&str]) -> Vec<Node> {
    ids.iter()
        .map(|id| Node {
            id: id.to_string(),
            status: NodeStatus {
                state: NodeState::Ready,
            },
        })
        .collect()
}

fn frame(service: Service, tasks: Vec<Task>) -> Frame {
    Frame {
        service,
        tasks,
        nodes: ready(&["node-a"]),
    }
}

async fn run(client: &ScriptedClient, sink: &mut RecordingSink) -> Result<(), ProgressError> {
    let cancel = CancellationToken::new();
    service_progress(client, "web", sink, &cancel, PollOptions::default()).await
}

#[tokio::test(start_paused = true)]
async fn replicated_rollout_converges_after_monitor_window() {
    let updating = Some((UpdateState::Updating, ""));
    let client = ScriptedClient::new(vec![
        frame(service(ServiceMode::replicated(3), updating), replicas(3, TaskState::Pending)),
        frame(service(ServiceMode::replicated(3), updating), replicas(3, TaskState::Running)),
    ]);
    let mut sink = RecordingSink::new();

    let start = Instant::now();
    run(&client, &mut sink).await.unwrap();
    assert!(start.elapsed() >= Duration::from_secs(5));

    let overall = sink.actions_for(OVERALL);
    assert_eq!(overall[0], "0 out of 3 tasks");
    assert!(overall.contains(&"3 out of 3 tasks"));
    for id in ["1/3", "2/3", "3/3"] {
        assert!(sink.actions_for(id).contains(&"pending  "));
    }

    let verify = sink.actions_for("verify");
    assert!(verify[0].starts_with("Waiting 6 seconds"));
    assert_eq!(verify.iter().filter(|a| **a == "Service converged").count(), 1);
    assert_eq!(sink.events().last().unwrap().action, "Service converged");
    assert_eq!(sink.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn service_monitor_overrides_default_window() {
    let svc = with_monitor(
        service(ServiceMode::replicated(1), None),
        Duration::from_secs(2),
    );
    let client = ScriptedClient::new(vec![frame(svc, replicas(1, TaskState::Running))]);
    let mut sink = RecordingSink::new();

    let start = Instant::now();
    run(&client, &mut sink).await.unwrap();
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn global_rollout_converges_on_every_active_node() {
    let svc = with_monitor(service(ServiceMode::global(), None), Duration::from_secs(1));
    let nodes = ["node-a", "node-b", "node-c"];
    let tasks: Vec<Task> = nodes.iter().map(|n| task(0, n, TaskState::Running)).collect();
    let client = ScriptedClient::new(vec![Frame {
        service: svc,
        tasks,
        nodes: ready(&nodes),
    }]);
    let mut sink = RecordingSink::new();

    run(&client, &mut sink).await.unwrap();
    assert_eq!(
        sink.actions_for(OVERALL),
        vec!["0 out of 3 tasks", "3 out of 3 tasks"]
    );
    assert_eq!(sink.events().last().unwrap().action, "Service converged");
}

#[tokio::test(start_paused = true)]
async fn paused_update_is_fatal() {
    let svc = service(
        ServiceMode::replicated(2),
        Some((UpdateState::Paused, "constraint unsatisfiable")),
    );
    let client = ScriptedClient::new(vec![frame(svc, replicas(2, TaskState::Running))]);
    let mut sink = RecordingSink::new();

    let err = run(&client, &mut sink).await.unwrap_err();
    assert!(matches!(err, ProgressError::UpdatePaused(_)));
    assert!(err.to_string().contains("constraint unsatisfiable"));
    assert_eq!(client.task_calls.load(Ordering::SeqCst), 0);
    assert_eq!(sink.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn rollback_paused_is_fatal() {
    let svc = service(
        ServiceMode::replicated(1),
        Some((UpdateState::RollbackPaused, "update out of sequence")),
    );
    let client = ScriptedClient::new(vec![frame(svc, replicas(1, TaskState::Running))]);
    let mut sink = RecordingSink::new();

    let err = run(&client, &mut sink).await.unwrap_err();
    assert_eq!(err.to_string(), "service rollback paused: update out of sequence");
}

#[tokio::test(start_paused = true)]
async fn rollback_completed_before_convergence_is_a_failure() {
    let client = ScriptedClient::new(vec![
        frame(
            service(ServiceMode::replicated(1), Some((UpdateState::Updating, ""))),
            replicas(1, TaskState::Starting),
        ),
        frame(
            service(
                ServiceMode::replicated(1),
                Some((UpdateState::RollbackCompleted, "rollback completed")),
            ),
            replicas(1, TaskState::Running),
        ),
    ]);
    let mut sink = RecordingSink::new();

    let err = run(&client, &mut sink).await.unwrap_err();
    assert!(matches!(err, ProgressError::RolledBack(ref m) if m == "rollback completed"));
    assert_eq!(sink.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn rollback_notice_is_shown_once() {
    let started = Some((UpdateState::RollbackStarted, "update paused: task failed"));
    let client = ScriptedClient::new(vec![
        frame(service(ServiceMode::replicated(1), started), replicas(1, TaskState::Starting)),
        frame(service(ServiceMode::replicated(1), started), replicas(1, TaskState::Starting)),
        frame(service(ServiceMode::replicated(1), started), replicas(1, TaskState::Running)),
        frame(
            service(
                ServiceMode::replicated(1),
                Some((UpdateState::RollbackCompleted, "rollback completed")),
            ),
            replicas(1, TaskState::Running),
        ),
    ]);
    let mut sink = RecordingSink::new();

    run(&client, &mut sink).await.unwrap();
    assert_eq!(sink.actions_for("rollback"), vec!["update paused: task failed"]);
    let overall = sink.actions_for(OVERALL);
    assert_eq!(overall[0], "rolling back update: 0 out of 1 tasks");
    assert_eq!(*overall.last().unwrap(), "rolling back update: 1 out of 1 tasks");

    let starting = sink
        .events()
        .iter()
        .find(|e| e.id == "1/1" && e.detail.is_some())
        .unwrap();
    assert_eq!(starting.detail.unwrap().current, 1);
}

#[tokio::test(start_paused = true)]
async fn completed_status_waits_for_local_convergence() {
    let completed = Some((UpdateState::Completed, "update completed"));
    let client = ScriptedClient::new(vec![
        frame(service(ServiceMode::replicated(2), completed), replicas(2, TaskState::Pending)),
        frame(service(ServiceMode::replicated(2), completed), replicas(2, TaskState::Running)),
    ]);
    let mut sink = RecordingSink::new();

    run(&client, &mut sink).await.unwrap();
    assert_eq!(client.service_calls(), 3);
    assert!(sink.actions_for(OVERALL).contains(&"2 out of 2 tasks"));
    assert!(!sink.actions_for("verify").contains(&"Service converged"));
}

#[tokio::test(start_paused = true)]
async fn regression_after_convergence_restarts_the_window() {
    let svc = || service(ServiceMode::replicated(2), Some((UpdateState::Updating, "")));
    let mut flapping = replicas(2, TaskState::Running);
    flapping[1].status.state = TaskState::Starting;
    let client = ScriptedClient::new(vec![
        frame(svc(), replicas(2, TaskState::Running)),
        frame(svc(), flapping),
        frame(svc(), replicas(2, TaskState::Running)),
    ]);
    let mut sink = RecordingSink::new();

    let start = Instant::now();
    run(&client, &mut sink).await.unwrap();
    // the clock restarted at the third tick
    assert!(start.elapsed() >= Duration::from_millis(5400));

    let events = sink.events();
    let failure = events
        .iter()
        .position(|e| e.id == "verify" && e.action == "Detected task failure")
        .unwrap();
    let regressed = events[..failure]
        .iter()
        .rposition(|e| e.id == OVERALL)
        .unwrap();
    assert_eq!(events[regressed].action, "1 out of 2 tasks");
    let recovered = events[failure..]
        .iter()
        .position(|e| e.id == OVERALL)
        .unwrap();
    assert_eq!(events[failure + recovered].action, "2 out of 2 tasks");
    assert_eq!(events.last().unwrap().action, "Service converged");
}

#[tokio::test(start_paused = true)]
async fn cancellation_detaches_without_error() {
    let client = ScriptedClient::new(vec![frame(
        service(ServiceMode::replicated(2), Some((UpdateState::Updating, ""))),
        replicas(2, TaskState::Preparing),
    )]);
    let mut sink = RecordingSink::new();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    service_progress(&client, "web", &mut sink, &cancel, PollOptions::default())
        .await
        .unwrap();

    assert_eq!(client.service_calls(), 2);
    let tail: Vec<&str> = sink.events()[sink.events().len() - 2..]
        .iter()
        .map(|e| e.action.as_str())
        .collect();
    assert_eq!(
        tail,
        vec![
            "Operation continuing in background.",
            "Use `docker service ps web` to check progress."
        ]
    );
    assert_eq!(sink.close_count(), 1);

    // nothing polls after the session ends
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(client.service_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_a_hanging_query() {
    let mut client = ScriptedClient::new(vec![frame(
        service(ServiceMode::replicated(2), Some((UpdateState::Updating, ""))),
        replicas(2, TaskState::Preparing),
    )]);
    client.hang_tasks = true;
    let mut sink = RecordingSink::new();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = service_progress(&client, "web", &mut sink, &cancel, PollOptions::default()).await;

    assert!(result.is_ok());
    assert_eq!(client.service_calls(), 1);
    assert_eq!(client.task_calls.load(Ordering::SeqCst), 1);
    let actions: Vec<&str> = sink.events().iter().map(|e| e.action.as_str()).collect();
    assert_eq!(
        actions,
        vec![
            "Operation continuing in background.",
            "Use `docker service ps web` to check progress."
        ]
    );
    assert_eq!(sink.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_before_start_makes_no_queries() {
    let client = ScriptedClient::new(vec![frame(
        service(ServiceMode::replicated(1), None),
        replicas(1, TaskState::New),
    )]);
    let mut sink = RecordingSink::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    service_progress(&client, "web", &mut sink, &cancel, PollOptions::default())
        .await
        .unwrap();
    assert_eq!(client.service_calls(), 0);
    assert_eq!(sink.events().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn query_errors_propagate_without_retry() {
    let mut client = ScriptedClient::new(vec![frame(
        service(ServiceMode::replicated(1), None),
        replicas(1, TaskState::Running),
    )]);
    client.fail_nodes = true;
    let mut sink = RecordingSink::new();

    let err = run(&client, &mut sink).await.unwrap_err();
    assert!(matches!(
        err,
        ProgressError::Client(ClientError::Status { status: 503, .. })
    ));
    assert_eq!(client.service_calls(), 1);
    assert_eq!(sink.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn unrecognized_mode_is_a_configuration_error() {
    let client = ScriptedClient::new(vec![frame(
        service(ServiceMode::default(), None),
        Vec::new(),
    )]);
    let mut sink = RecordingSink::new();

    let err = run(&client, &mut sink).await.unwrap_err();
    assert_eq!(err.to_string(), "unrecognized service mode");
    assert!(sink.events().is_empty());
}
