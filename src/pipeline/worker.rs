use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use opencv::prelude::*;

use crate::alerts::{AlertOutcome, AlertTable};
use crate::analytics::{resolve_frame_label, DetectError, Detector};
use crate::config::PipelineConfig;

use super::mailbox::{FrameMailbox, FrameTask};
use super::result::{LatestResult, ResultCache};

#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub stale_after: Duration,
    pub poll_interval: Duration,
}

impl From<&PipelineConfig> for WorkerSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            stale_after: Duration::from_millis(config.stale_after_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Idle,
    Stale,
    Published,
    Failed,
}

/// Sole consumer of the mailbox and sole writer of alert state and results.
pub struct Worker {
    mailbox: Arc<FrameMailbox>,
    detector: Detector,
    alerts: AlertTable,
    results: ResultCache,
    settings: WorkerSettings,
    last_frame_at: Option<Instant>,
}

impl Worker {
    pub fn new(
        mailbox: Arc<FrameMailbox>,
        detector: Detector,
        alerts: AlertTable,
        results: ResultCache,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            mailbox,
            detector,
            alerts,
            results,
            settings,
            last_frame_at: None,
        }
    }

    fn run(mut self, shutdown: Arc<AtomicBool>) {
        tracing::info!(backend = self.detector.backend_name(), "detection worker started");

        while !shutdown.load(Ordering::Relaxed) {
            if self.tick() == Tick::Idle {
                thread::sleep(self.settings.poll_interval);
            }
        }

        tracing::info!("detection worker stopped");
    }

    /// One drain-and-process cycle.
    pub fn tick(&mut self) -> Tick {
        let Some(latest) = self.mailbox.take_latest() else {
            return Tick::Idle;
        };

        if latest.discarded > 0 {
            tracing::debug!(discarded = latest.discarded, "dropped older queued frames");
        }

        let task = latest.item;
        let now = Instant::now();
        let age = now.saturating_duration_since(task.captured_at);
        if age > self.settings.stale_after {
            tracing::debug!(
                user = %task.user_id,
                age_ms = age.as_millis() as u64,
                "skipping stale frame"
            );
            return Tick::Stale;
        }

        match self.process(&task) {
            Ok(result) => {
                self.results.publish(result);
                Tick::Published
            }
            Err(e) => {
                tracing::error!(user = %task.user_id, error = %e, "frame processing failed");
                Tick::Failed
            }
        }
    }

    fn process(&mut self, task: &FrameTask) -> Result<LatestResult, DetectError> {
        let started = Instant::now();
        let fps = self
            .last_frame_at
            .map(|prev| started.saturating_duration_since(prev).as_secs_f32())
            .filter(|dt| *dt > 0.0)
            .map(|dt| ((1.0 / dt) * 10.0).round() / 10.0);
        self.last_frame_at = Some(started);

        let detections = self.detector.detect(&task.image)?;
        let frame_label = resolve_frame_label(&detections);

        let outcome = self.alerts.observe(task.user_id, frame_label, Instant::now());
        match outcome {
            AlertOutcome::Triggered(label) => {
                tracing::warn!(user = %task.user_id, alert = %label, "alert triggered");
            }
            AlertOutcome::Suppressed { label, retry_in } => {
                tracing::info!(
                    user = %task.user_id,
                    alert = %label,
                    retry_in_secs = retry_in.as_secs(),
                    "alert suppressed by cooldown"
                );
            }
            AlertOutcome::Filling | AlertOutcome::Quiet => {}
        }

        tracing::trace!(
            user = %task.user_id,
            detections = detections.len(),
            infer_ms = started.elapsed().as_millis() as u64,
            "frame processed"
        );

        Ok(LatestResult {
            frame_width: task.image.cols(),
            frame_height: task.image.rows(),
            detections,
            alert_trigger: outcome.alert(),
            fps,
        })
    }
}

pub fn spawn_worker(worker: Worker, shutdown: Arc<AtomicBool>) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || worker.run(shutdown))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertPolicy, UserId};
    use crate::analytics::testing::{GatedBackend, ScriptedBackend};
    use std::sync::mpsc;
    use crate::analytics::{DecodeParams, HazardLabel, RawBox, RawOutput};
    use opencv::core::{Mat, Scalar, CV_8UC3};

    struct Harness {
        worker: Worker,
        backend_calls: Arc<std::sync::Mutex<usize>>,
        mailbox: Arc<FrameMailbox>,
        alerts: AlertTable,
        results: ResultCache,
    }

    fn harness(outputs: Vec<Result<RawOutput, DetectError>>) -> Harness {
        let backend = ScriptedBackend::new(32);
        for o in outputs {
            backend.push(o);
        }
        let backend_calls = backend.calls.clone();
        let detector = Detector::new(Box::new(backend), DecodeParams::default(), 114.0);
        let mailbox = Arc::new(FrameMailbox::new(5));
        let alerts = AlertTable::new(AlertPolicy::default());
        let results = ResultCache::new();
        let worker = Worker::new(
            Arc::clone(&mailbox),
            detector,
            alerts.clone(),
            results.clone(),
            WorkerSettings {
                stale_after: Duration::from_millis(2000),
                poll_interval: Duration::from_millis(10),
            },
        );
        Harness {
            worker,
            backend_calls,
            mailbox,
            alerts,
            results,
        }
    }

    fn frame_task(user: u64, captured_at: Instant) -> FrameTask {
        FrameTask {
            image: Mat::new_rows_cols_with_default(48, 64, CV_8UC3, Scalar::all(0.0)).unwrap(),
            captured_at,
            user_id: UserId(user),
        }
    }

    fn fire_box() -> RawOutput {
        RawOutput::Preboxed(vec![RawBox {
            x1: 4.0,
            y1: 8.0,
            x2: 12.0,
            y2: 16.0,
            confidence: 0.9,
            class_id: 0,
        }])
    }

    #[test]
    fn test_idle_when_mailbox_empty() {
        let mut h = harness(vec![]);
        assert_eq!(h.worker.tick(), Tick::Idle);
    }

    #[test]
    fn test_publishes_detections_and_frame_size() {
        let mut h = harness(vec![Ok(fire_box())]);
        h.mailbox.submit(frame_task(1, Instant::now()));

        assert_eq!(h.worker.tick(), Tick::Published);
        let latest = h.results.latest();
        assert_eq!(latest.frame_width, 64);
        assert_eq!(latest.frame_height, 48);
        assert_eq!(latest.detections.len(), 1);
        assert_eq!(latest.detections[0].label, HazardLabel::Fire);
        assert_eq!(latest.alert_trigger, None);
        assert_eq!(latest.fps, None);
        assert_eq!(h.alerts.snapshot(UserId(1)).unwrap().window, vec![HazardLabel::Fire]);
    }

    #[test]
    fn test_stale_frame_touches_nothing() {
        let mut h = harness(vec![Ok(fire_box())]);
        let old = Instant::now() - Duration::from_millis(2500);
        h.mailbox.submit(frame_task(1, old));

        assert_eq!(h.worker.tick(), Tick::Stale);
        assert_eq!(*h.backend_calls.lock().unwrap(), 0);
        assert!(h.alerts.snapshot(UserId(1)).is_none());
        assert_eq!(*h.results.latest(), LatestResult::default());
    }

    #[test]
    fn test_failure_keeps_previous_result() {
        let mut h = harness(vec![
            Ok(fire_box()),
            Err(DetectError::Runtime("boom".into())),
            Ok(RawOutput::Preboxed(vec![])),
        ]);

        h.mailbox.submit(frame_task(1, Instant::now()));
        assert_eq!(h.worker.tick(), Tick::Published);
        let before = h.results.latest();

        h.mailbox.submit(frame_task(1, Instant::now()));
        assert_eq!(h.worker.tick(), Tick::Failed);
        assert_eq!(*h.results.latest(), *before);
        assert_eq!(h.alerts.snapshot(UserId(1)).unwrap().window.len(), 1);

        h.mailbox.submit(frame_task(1, Instant::now()));
        assert_eq!(h.worker.tick(), Tick::Published);
        assert!(h.results.latest().detections.is_empty());
        assert!(h.results.latest().fps.is_some());
    }

    #[test]
    fn test_only_newest_frame_is_processed() {
        let mut h = harness(vec![Ok(fire_box())]);
        h.mailbox.submit(frame_task(1, Instant::now()));
        h.mailbox.submit(frame_task(2, Instant::now()));

        assert_eq!(h.worker.tick(), Tick::Published);
        assert_eq!(*h.backend_calls.lock().unwrap(), 1);
        assert!(h.alerts.snapshot(UserId(1)).is_none());
        assert!(h.alerts.snapshot(UserId(2)).is_some());
        assert_eq!(h.worker.tick(), Tick::Idle);
    }

    #[test]
    fn test_fps_baseline_ignores_stale_frames() {
        let mut h = harness(vec![Ok(fire_box())]);
        h.mailbox.submit(frame_task(1, Instant::now() - Duration::from_millis(2500)));
        assert_eq!(h.worker.tick(), Tick::Stale);

        h.mailbox.submit(frame_task(1, Instant::now()));
        assert_eq!(h.worker.tick(), Tick::Published);
        assert_eq!(h.results.latest().fps, None);
    }

    #[test]
    fn test_producers_submit_while_inference_runs() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let backend = GatedBackend {
            entered: entered_tx,
            release: release_rx,
        };
        let mailbox = Arc::new(FrameMailbox::new(5));
        let alerts = AlertTable::new(AlertPolicy::default());
        let mut worker = Worker::new(
            Arc::clone(&mailbox),
            Detector::new(Box::new(backend), DecodeParams::default(), 114.0),
            alerts.clone(),
            ResultCache::new(),
            WorkerSettings {
                stale_after: Duration::from_millis(2000),
                poll_interval: Duration::from_millis(10),
            },
        );

        mailbox.submit(frame_task(1, Instant::now()));
        let busy = thread::spawn(move || {
            let tick = worker.tick();
            (worker, tick)
        });
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let producer = {
            let mailbox = Arc::clone(&mailbox);
            thread::spawn(move || {
                for user in 2..=4 {
                    mailbox.submit(frame_task(user, Instant::now()));
                }
            })
        };
        producer.join().unwrap();
        assert_eq!(mailbox.len(), 3);

        release_tx.send(()).unwrap();
        let (mut worker, first) = busy.join().unwrap();
        assert_eq!(first, Tick::Published);
        assert!(alerts.snapshot(UserId(1)).is_some());

        release_tx.send(()).unwrap();
        assert_eq!(worker.tick(), Tick::Published);
        assert!(alerts.snapshot(UserId(4)).is_some());
        assert!(alerts.snapshot(UserId(2)).is_none());
        assert!(alerts.snapshot(UserId(3)).is_none());
        assert_eq!(mailbox.len(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_flag_stops_worker() {
        let h = harness(vec![]);
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = spawn_worker(h.worker, Arc::clone(&shutdown));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!handle.is_finished());

        shutdown.store(true, Ordering::Relaxed);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker did not stop")
            .unwrap();
    }

    #[test]
    fn test_sixth_fire_frame_raises_alert() {
        let mut h = harness((0..6).map(|_| Ok(fire_box())).collect());
        for i in 0..6 {
            h.mailbox.submit(frame_task(7, Instant::now()));
            assert_eq!(h.worker.tick(), Tick::Published);
            let expected = if i == 5 { Some(HazardLabel::Fire) } else { None };
            assert_eq!(h.results.latest().alert_trigger, expected);
        }
        assert!(h.alerts.snapshot(UserId(7)).unwrap().window.is_empty());
    }
}
