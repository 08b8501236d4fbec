use super::*;
use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;

use async_trait::async_trait;
use beacon_config::AutoRestartSettings;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::launcher::LaunchedProcess;

#[derive(Clone, Copy)]
enum Step {
    FailInit(&'static str),
    RunUntilCancelled,
    ExitImmediately,
    Panic,
    Fault(&'static str),
}

#[derive(Default)]
struct ScriptedLauncher {
    script: Mutex<VecDeque<Step>>,
    launches: AtomicUsize,
    stops: Arc<AtomicUsize>,
}

impl ScriptedLauncher {
    fn new(steps: &[Step]) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.iter().copied().collect()),
            ..Default::default()
        })
    }

    fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

async fn explode() -> Result<(), SupervisorError> {
    panic!("boom")
}

#[async_trait]
impl ProcessLauncher for ScriptedLauncher {
    async fn launch(
        &self,
        _settings: &Settings,
        cancel: CancellationToken,
    ) -> Result<LaunchedProcess, SupervisorError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .pop_front()
            .unwrap_or(Step::RunUntilCancelled);

        let run: BoxFuture<'static, Result<(), SupervisorError>> = match step {
            Step::FailInit(message) => return Err(SupervisorError::fault(message)),
            Step::RunUntilCancelled => {
                let stops = self.stops.clone();
                Box::pin(async move {
                    cancel.cancelled().await;
                    stops.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), SupervisorError>(())
                })
            }
            Step::ExitImmediately => Box::pin(async { Ok::<(), SupervisorError>(()) }),
            Step::Panic => Box::pin(explode()),
            Step::Fault(message) => Box::pin(async move { Err::<(), _>(SupervisorError::fault(message)) }),
        };

        Ok(LaunchedProcess {
            monitor: None,
            mode: ProcessMode::WebOnly,
            run,
        })
    }
}

fn settings() -> Settings {
    Settings::default()
}

fn fast_settings() -> Settings {
    Settings {
        auto_restart: AutoRestartSettings {
            delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
            ..Default::default()
        },
        ..Settings::default()
    }
}

fn supervisor(launcher: Arc<ScriptedLauncher>) -> Arc<Supervisor> {
    let config = SupervisorConfig {
        shutdown_grace_ms: 200,
        settle_delay_ms: 0,
    };
    Arc::new(Supervisor::new(launcher, &config))
}

async fn wait_until<F: Fn() -> bool>(cond: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn armed_delay(sup: &Supervisor) -> Option<Duration> {
    sup.health().pending.map(|p| p.delay)
}

#[tokio::test]
async fn test_init_failure_runs_unhealthy_with_timer_at_base_delay() {
    let sup = supervisor(ScriptedLauncher::new(&[Step::FailInit("getMe: Unauthorized")]));

    sup.start(settings()).await.unwrap();

    assert!(sup.is_running());
    assert!(!sup.is_healthy());
    assert!(sup.last_error().unwrap().contains("Unauthorized"));
    assert_eq!(sup.attempts(), 1);
    assert_eq!(armed_delay(&sup), Some(Duration::from_secs(30)));
    sup.shutdown().await;
}

#[tokio::test]
async fn test_consecutive_failures_back_off_exponentially() {
    let fail = Step::FailInit("bad token");
    let sup = supervisor(ScriptedLauncher::new(&[fail, fail, fail]));

    sup.start(settings()).await.unwrap();
    let mut observed = vec![armed_delay(&sup).unwrap()];
    for _ in 0..2 {
        sup.restart(settings()).await.unwrap();
        observed.push(armed_delay(&sup).unwrap());
    }

    assert_eq!(
        observed,
        vec![
            Duration::from_secs(30),
            Duration::from_secs(60),
            Duration::from_secs(120)
        ]
    );
    assert_eq!(sup.attempts(), 3);
    sup.shutdown().await;
}

#[tokio::test]
async fn test_successful_start_resets_attempts() {
    let fail = Step::FailInit("bad token");
    let launcher = ScriptedLauncher::new(&[fail, fail]);
    let sup = supervisor(launcher.clone());

    sup.start(settings()).await.unwrap();
    sup.restart(settings()).await.unwrap();
    assert_eq!(sup.attempts(), 2);

    sup.restart(settings()).await.unwrap();

    assert_eq!(sup.attempts(), 0);
    assert!(sup.is_healthy());
    assert!(sup.last_error().is_none());
    assert!(armed_delay(&sup).is_none());
    assert_eq!(launcher.launches(), 3);
    sup.shutdown().await;
}

#[tokio::test]
async fn test_start_twice_is_already_running() {
    let sup = supervisor(ScriptedLauncher::new(&[]));
    sup.start(settings()).await.unwrap();

    let err = sup.start(settings()).await.unwrap_err();

    assert!(matches!(err, SupervisorError::AlreadyRunning));
    sup.shutdown().await;
}

#[tokio::test]
async fn test_stop_cancels_timer_and_is_idempotent() {
    let sup = supervisor(ScriptedLauncher::new(&[Step::FailInit("bad token")]));
    sup.start(settings()).await.unwrap();
    assert!(armed_delay(&sup).is_some());

    sup.stop().await;
    assert!(!sup.is_running());
    assert!(!sup.is_healthy());
    assert!(armed_delay(&sup).is_none());

    sup.stop().await;
    assert!(!sup.is_running());
}

#[tokio::test]
async fn test_stop_waits_for_process_to_finish() {
    let launcher = ScriptedLauncher::new(&[]);
    let sup = supervisor(launcher.clone());
    sup.start(settings()).await.unwrap();
    assert!(sup.is_healthy());

    sup.stop().await;

    assert_eq!(launcher.stops.load(Ordering::SeqCst), 1);
    assert!(sup.last_error().is_none());
    assert_eq!(sup.attempts(), 0);
}

#[tokio::test]
async fn test_unexpected_exit_schedules_restart() {
    let sup = supervisor(ScriptedLauncher::new(&[Step::ExitImmediately]));
    sup.start(settings()).await.unwrap();

    let watched = sup.clone();
    wait_until(|| !watched.is_healthy()).await;

    assert!(sup.is_running());
    assert!(sup.last_error().unwrap().contains("unexpectedly"));
    assert_eq!(sup.attempts(), 1);
    assert_eq!(armed_delay(&sup), Some(Duration::from_secs(30)));
    sup.shutdown().await;
}

#[tokio::test]
async fn test_panic_is_contained() {
    let sup = supervisor(ScriptedLauncher::new(&[Step::Panic]));
    sup.start(settings()).await.unwrap();

    let watched = sup.clone();
    wait_until(|| watched.last_error().is_some()).await;

    assert!(sup.is_running());
    assert!(!sup.is_healthy());
    assert_eq!(sup.last_error().unwrap(), "notifying process panicked: boom");
    assert!(armed_delay(&sup).is_some());
    sup.shutdown().await;
}

#[tokio::test]
async fn test_runtime_fault_is_recorded() {
    let sup = supervisor(ScriptedLauncher::new(&[Step::Fault("chat channel unreachable")]));
    sup.start(settings()).await.unwrap();

    let watched = sup.clone();
    wait_until(|| watched.last_error().is_some()).await;

    assert_eq!(sup.last_error().unwrap(), "chat channel unreachable");
    assert_eq!(sup.attempts(), 1);
    sup.shutdown().await;
}

#[tokio::test]
async fn test_timer_restarts_with_previous_settings() {
    let launcher = ScriptedLauncher::new(&[Step::FailInit("bad token")]);
    let sup = supervisor(launcher.clone());

    sup.start(fast_settings()).await.unwrap();
    let watched = sup.clone();
    wait_until(|| watched.is_healthy()).await;

    assert_eq!(sup.attempts(), 0);
    assert_eq!(launcher.launches(), 2);
    assert_eq!(sup.settings(), Some(fast_settings()));
    sup.shutdown().await;
}

#[tokio::test]
async fn test_timer_invokes_restart_hook() {
    let sup = supervisor(ScriptedLauncher::new(&[Step::FailInit("bad token")]));
    let (tx, mut rx) = mpsc::unbounded_channel();
    sup.set_restart_hook(Arc::new(move || {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(());
        }) as BoxFuture<'static, ()>
    }));

    sup.start(fast_settings()).await.unwrap();

    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("hook not invoked")
        .unwrap();
    assert!(armed_delay(&sup).is_none());
    sup.shutdown().await;
}

#[tokio::test]
async fn test_disabled_auto_restart_arms_nothing() {
    let sup = supervisor(ScriptedLauncher::new(&[Step::FailInit("bad token")]));
    let mut disabled = settings();
    disabled.auto_restart.enabled = false;

    sup.start(disabled).await.unwrap();

    assert!(!sup.is_healthy());
    assert!(armed_delay(&sup).is_none());
    sup.shutdown().await;
}

#[tokio::test]
async fn test_max_attempts_stops_scheduling() {
    let fail = Step::FailInit("bad token");
    let sup = supervisor(ScriptedLauncher::new(&[fail, fail]));
    let mut limited = settings();
    limited.auto_restart.max_attempts = 2;

    sup.start(limited.clone()).await.unwrap();
    assert_eq!(sup.attempts(), 1);
    assert!(armed_delay(&sup).is_some());

    sup.restart(limited).await.unwrap();
    assert_eq!(sup.attempts(), 2);
    assert!(armed_delay(&sup).is_none());
    sup.shutdown().await;
}

#[tokio::test]
async fn test_single_attempt_limit_arms_nothing() {
    let sup = supervisor(ScriptedLauncher::new(&[Step::FailInit("bad token")]));
    let mut limited = settings();
    limited.auto_restart.max_attempts = 1;

    sup.start(limited).await.unwrap();

    assert_eq!(sup.attempts(), 1);
    assert!(!sup.is_healthy());
    assert!(armed_delay(&sup).is_none());
    sup.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_suppresses_restarts() {
    let launcher = ScriptedLauncher::new(&[Step::FailInit("bad token")]);
    let sup = supervisor(launcher.clone());
    sup.start(fast_settings()).await.unwrap();

    sup.shutdown().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!sup.is_running());
    assert_eq!(launcher.launches(), 1);
}

#[tokio::test]
async fn test_start_after_shutdown_is_refused() {
    let launcher = ScriptedLauncher::new(&[]);
    let sup = supervisor(launcher.clone());
    sup.shutdown().await;

    let err = sup.start(settings()).await.unwrap_err();

    assert!(matches!(err, SupervisorError::ShutDown));
    assert!(!sup.is_running());
    assert_eq!(launcher.launches(), 0);
}

#[tokio::test]
async fn test_fired_timer_cannot_relaunch_after_shutdown() {
    let launcher = ScriptedLauncher::new(&[Step::FailInit("bad token")]);
    let sup = supervisor(launcher.clone());
    let (fired_tx, mut fired_rx) = mpsc::unbounded_channel();
    let (go_tx, go_rx) = mpsc::unbounded_channel::<()>();
    let (result_tx, mut result_rx) = mpsc::unbounded_channel();
    let go_rx = Arc::new(tokio::sync::Mutex::new(go_rx));
    let weak = Arc::downgrade(&sup);
    sup.set_restart_hook(Arc::new(move || {
        let weak = weak.clone();
        let fired_tx = fired_tx.clone();
        let result_tx = result_tx.clone();
        let go_rx = go_rx.clone();
        Box::pin(async move {
            let _ = fired_tx.send(());
            go_rx.lock().await.recv().await;
            if let Some(sup) = weak.upgrade() {
                let _ = result_tx.send(sup.restart(fast_settings()).await);
            }
        }) as BoxFuture<'static, ()>
    }));

    sup.start(fast_settings()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), fired_rx.recv())
        .await
        .expect("timer did not fire")
        .unwrap();

    sup.shutdown().await;
    go_tx.send(()).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(2), result_rx.recv())
        .await
        .expect("hook did not finish")
        .unwrap();

    assert!(matches!(result, Err(SupervisorError::ShutDown)));
    assert!(!sup.is_running());
    assert_eq!(launcher.launches(), 1);
}

#[tokio::test]
async fn test_health_reports_mode_and_start_time() {
    let sup = supervisor(ScriptedLauncher::new(&[]));
    assert!(sup.health().started_at.is_none());

    sup.start(settings()).await.unwrap();
    let health = sup.health();

    assert!(health.running);
    assert!(health.healthy);
    assert_eq!(health.mode, Some(ProcessMode::WebOnly));
    assert!(health.started_at.is_some());
    assert_eq!(health.active_sources, 0);
    sup.shutdown().await;
}

#[test]
fn test_panic_message_variants() {
    assert_eq!(panic_message(Box::new("static")), "static");
    assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
    assert_eq!(panic_message(Box::new(42)), "unknown panic");
}
