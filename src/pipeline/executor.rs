use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded, select, unbounded};

use crate::{
    detector::{DetectorError, LandmarkerHelper},
    settings::DetectorConfig,
    types::{DetectorEvent, Frame},
};

#[derive(Clone, Debug)]
enum Command {
    Setup,
    Reconfigure(DetectorConfig),
    Clear,
}

/// Single worker thread that owns the landmarker. Every setup, teardown and
/// inference runs here, one at a time, so the detector is never touched from
/// two threads.
pub struct AnalysisExecutor {
    command_tx: Option<Sender<Command>>,
    frame_tx: Sender<Frame>,
    handle: Option<thread::JoinHandle<()>>,
}

impl AnalysisExecutor {
    pub fn spawn(helper: LandmarkerHelper, event_tx: Sender<DetectorEvent>) -> Result<Self> {
        let (command_tx, command_rx) = unbounded();
        let (frame_tx, frame_rx) = bounded(1);

        let handle = thread::Builder::new()
            .name("landmark-analysis".into())
            .spawn(move || run_worker_loop(helper, command_rx, frame_rx, event_tx))
            .context("failed to spawn analysis thread")?;

        Ok(Self {
            command_tx: Some(command_tx),
            frame_tx,
            handle: Some(handle),
        })
    }

    /// The capacity-1 queue frames should be offered to with `try_send`.
    pub fn frame_sender(&self) -> Sender<Frame> {
        self.frame_tx.clone()
    }

    /// Sets the detector up again if it was released.
    pub fn resume(&self) {
        self.send(Command::Setup);
    }

    /// Releases the detector. The configuration is kept for the next resume.
    pub fn pause(&self) {
        self.send(Command::Clear);
    }

    pub fn reconfigure(&self, config: DetectorConfig) {
        self.send(Command::Reconfigure(config));
    }

    pub fn shutdown(mut self) {
        self.join();
    }

    fn send(&self, command: Command) {
        if let Some(tx) = &self.command_tx {
            if tx.send(command).is_err() {
                log::warn!("analysis thread has exited, command dropped");
            }
        }
    }

    fn join(&mut self) {
        // Closing the command channel lets the worker finish the frame in
        // flight and exit.
        self.command_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("analysis thread panicked");
            }
        }
    }
}

impl Drop for AnalysisExecutor {
    fn drop(&mut self) {
        self.join();
    }
}

fn run_worker_loop(
    mut helper: LandmarkerHelper,
    command_rx: Receiver<Command>,
    frame_rx: Receiver<Frame>,
    event_tx: Sender<DetectorEvent>,
) {
    log::info!("analysis executor started");

    loop {
        // Pending commands win over queued frames.
        match command_rx.try_recv() {
            Ok(command) => {
                handle_command(&mut helper, command, &event_tx);
                continue;
            }
            Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }

        select! {
            recv(command_rx) -> command => match command {
                Ok(command) => handle_command(&mut helper, command, &event_tx),
                Err(_) => break,
            },
            recv(frame_rx) -> frame => match frame {
                Ok(frame) => {
                    let frame = latest_frame(frame, &frame_rx);
                    analyze(&mut helper, &frame, &event_tx);
                }
                Err(_) => break,
            },
        }
    }

    helper.clear();
    log::info!("analysis executor stopped");
}

fn handle_command(
    helper: &mut LandmarkerHelper,
    command: Command,
    event_tx: &Sender<DetectorEvent>,
) {
    log::debug!("analysis command {command:?}");
    let outcome = match command {
        Command::Setup if helper.is_closed() => helper.setup(),
        Command::Setup => Ok(()),
        Command::Reconfigure(config) => helper.reconfigure(config),
        Command::Clear => {
            helper.clear();
            Ok(())
        }
    };

    if let Err(err) = outcome {
        log::error!("failed to set up hand landmarker: {err}");
        // Setup failures must reach the UI even when results fill the queue.
        if event_tx.send(error_event(&err)).is_err() {
            log::trace!("UI is gone, dropping setup error");
        }
    }
}

fn analyze(helper: &mut LandmarkerHelper, frame: &Frame, event_tx: &Sender<DetectorEvent>) {
    if helper.is_closed() {
        log::trace!("detector released, skipping frame");
        return;
    }

    match helper.detect_live_stream(frame) {
        Ok(bundle) => {
            log::trace!(
                "{} hand(s) in {:?}",
                bundle.landmarks.hands.len(),
                bundle.inference_time
            );
            publish(event_tx, DetectorEvent::Results(bundle));
        }
        Err(err) => {
            log::warn!("hand landmark inference failed: {err}");
            publish(event_tx, error_event(&err));
        }
    }
}

fn error_event(err: &DetectorError) -> DetectorEvent {
    DetectorEvent::Error {
        message: err.to_string(),
        kind: err.kind(),
    }
}

fn publish(event_tx: &Sender<DetectorEvent>, event: DetectorEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => log::trace!("UI is behind, dropping detector event"),
        Err(TrySendError::Disconnected(_)) => log::trace!("UI is gone, dropping detector event"),
    }
}

fn latest_frame(mut frame: Frame, frame_rx: &Receiver<Frame>) -> Frame {
    while let Ok(newer) = frame_rx.try_recv() {
        frame = newer;
    }
    frame
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::{
        detector::{
            HandLandmarker, LandmarkerFactory,
            tests::{FakeFactory, FakeLandmarker, test_frame},
        },
        settings::Delegate,
        types::{ErrorKind, LandmarkSet},
    };

    const WAIT: Duration = Duration::from_secs(5);

    fn spawn_with(factory: impl LandmarkerFactory) -> (AnalysisExecutor, Receiver<DetectorEvent>) {
        let (event_tx, event_rx) = bounded(16);
        let helper = LandmarkerHelper::new(Box::new(factory), DetectorConfig::default());
        let executor = AnalysisExecutor::spawn(helper, event_tx).unwrap();
        (executor, event_rx)
    }

    struct SlowLandmarker {
        started: Sender<()>,
        delay: Duration,
    }

    impl HandLandmarker for SlowLandmarker {
        fn detect(&mut self, frame: &Frame) -> anyhow::Result<LandmarkSet> {
            let _ = self.started.send(());
            thread::sleep(self.delay);
            FakeLandmarker.detect(frame)
        }
    }

    struct SlowFactory {
        started: Sender<()>,
        delay: Duration,
    }

    impl LandmarkerFactory for SlowFactory {
        fn create(
            &self,
            _config: &DetectorConfig,
        ) -> Result<Box<dyn HandLandmarker>, DetectorError> {
            Ok(Box::new(SlowLandmarker {
                started: self.started.clone(),
                delay: self.delay,
            }))
        }
    }

    #[test]
    fn results_follow_resume() {
        let (executor, events) = spawn_with(FakeFactory::new());
        executor.resume();
        let frames = executor.frame_sender();
        frames.send(test_frame(4, 3)).unwrap();

        match events.recv_timeout(WAIT).unwrap() {
            DetectorEvent::Results(bundle) => {
                assert_eq!(bundle.input_width, 4);
                assert_eq!(bundle.landmarks.hands.len(), 1);
            }
            other => panic!("unexpected event {other:?}"),
        }
        executor.shutdown();
    }

    #[test]
    fn paused_executor_skips_frames() {
        let (executor, events) = spawn_with(FakeFactory::new());
        let frames = executor.frame_sender();
        frames.send(test_frame(4, 3)).unwrap();
        assert!(events.recv_timeout(Duration::from_millis(200)).is_err());

        executor.resume();
        executor.pause();
        thread::sleep(Duration::from_millis(100));
        frames.send(test_frame(4, 3)).unwrap();
        assert!(events.recv_timeout(Duration::from_millis(200)).is_err());
        executor.shutdown();
    }

    #[test]
    fn offering_next_frame_never_blocks() {
        let (started_tx, started_rx) = unbounded();
        let (executor, events) = spawn_with(SlowFactory {
            started: started_tx,
            delay: Duration::from_millis(300),
        });
        executor.resume();
        let frames = executor.frame_sender();
        frames.send(test_frame(1, 1)).unwrap();
        started_rx.recv_timeout(WAIT).unwrap();

        let offered = Instant::now();
        assert!(frames.try_send(test_frame(2, 1)).is_ok());
        assert!(matches!(
            frames.try_send(test_frame(3, 1)),
            Err(TrySendError::Full(_))
        ));
        assert!(offered.elapsed() < Duration::from_millis(100));

        // Frame 3 was dropped, frame 2 is analysed after frame 1.
        let widths: Vec<u32> = (0..2)
            .map(|_| match events.recv_timeout(WAIT).unwrap() {
                DetectorEvent::Results(bundle) => bundle.input_width,
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(widths, vec![1, 2]);
        executor.shutdown();
    }

    #[test]
    fn gpu_failure_is_reported() {
        let (executor, events) = spawn_with(FakeFactory::new());
        let mut config = DetectorConfig::default();
        config.delegate = Delegate::Gpu;
        executor.reconfigure(config);

        match events.recv_timeout(WAIT).unwrap() {
            DetectorEvent::Error { kind, .. } => assert_eq!(kind, ErrorKind::GpuUnavailable),
            other => panic!("unexpected event {other:?}"),
        }
        executor.shutdown();
    }

    #[test]
    fn shutdown_waits_for_frame_in_flight() {
        let (started_tx, started_rx) = unbounded();
        let (executor, events) = spawn_with(SlowFactory {
            started: started_tx,
            delay: Duration::from_millis(150),
        });
        executor.resume();
        executor.frame_sender().send(test_frame(5, 5)).unwrap();
        started_rx.recv_timeout(WAIT).unwrap();
        executor.shutdown();

        assert!(matches!(events.try_recv(), Ok(DetectorEvent::Results(_))));
    }

    #[test]
    fn drains_to_newest_frame() {
        let (tx, rx) = bounded(3);
        for width in 1..=3 {
            tx.send(test_frame(width, 1)).unwrap();
        }
        let first = rx.recv().unwrap();
        assert_eq!(latest_frame(first, &rx).width, 3);
    }
}
