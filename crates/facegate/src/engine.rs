use facegate_core::command::CommandSource;
use facegate_core::{
    AccessController, AccessError, AuthSystem, Config, OperatorCommand, ScrfdLocator, Session,
};
use facegate_hw::Camera;
use std::sync::mpsc as std_mpsc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] facegate_hw::CameraError),
    #[error("detector error: {0}")]
    Detector(#[from] facegate_core::detector::DetectorError),
    #[error("access loop: {0}")]
    Access(#[from] AccessError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// What the loop ended with.
pub struct EngineOutcome {
    pub session: Option<Session>,
    pub system: AuthSystem,
}

/// Handle to the engine thread: feeds commands in, waits for the outcome.
pub struct EngineHandle {
    commands: mpsc::Sender<OperatorCommand>,
    done: oneshot::Receiver<Result<EngineOutcome, EngineError>>,
}

impl EngineHandle {
    pub fn commands(&self) -> mpsc::Sender<OperatorCommand> {
        self.commands.clone()
    }

    pub fn done(&mut self) -> &mut oneshot::Receiver<Result<EngineOutcome, EngineError>> {
        &mut self.done
    }
}

/// Drains operator commands without blocking the loop.
struct ChannelCommands(mpsc::Receiver<OperatorCommand>);

impl CommandSource for ChannelCommands {
    fn poll_command(&mut self) -> Option<OperatorCommand> {
        self.0.try_recv().ok()
    }
}

/// Spawn the access loop on a dedicated OS thread.
///
/// The camera and the detector are opened on that thread; this call waits
/// until both are up, so a missing device or model fails startup.
pub fn spawn_engine(config: &Config, system: AuthSystem) -> Result<EngineHandle, EngineError> {
    let (cmd_tx, cmd_rx) = mpsc::channel::<OperatorCommand>(16);
    let (done_tx, done_rx) = oneshot::channel();
    let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), EngineError>>();

    let camera_device = config.camera_device.clone();
    let model_path = config.model_path.clone();
    let warmup_frames = config.warmup_frames;
    let settings = config.loop_settings();

    std::thread::Builder::new()
        .name("facegate-engine".into())
        .spawn(move || {
            let opened = Camera::open(&camera_device)
                .map_err(EngineError::from)
                .and_then(|camera| Ok((camera, ScrfdLocator::load(&model_path)?)));
            let (mut camera, locator) = match opened {
                Ok(parts) => {
                    let _ = ready_tx.send(Ok(()));
                    parts
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            if warmup_frames > 0 {
                tracing::info!(count = warmup_frames, "discarding warmup frames");
                camera.warm_up(warmup_frames);
            }

            tracing::info!("engine thread started");
            let mut controller = AccessController::new(camera, locator, system, settings);
            let mut commands = ChannelCommands(cmd_rx);
            let result = controller
                .run(&mut commands)
                .map(|session| EngineOutcome {
                    session,
                    system: controller.into_system(),
                })
                .map_err(EngineError::from);
            let _ = done_tx.send(result);
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    ready_rx.recv().map_err(|_| EngineError::ChannelClosed)??;
    Ok(EngineHandle {
        commands: cmd_tx,
        done: done_rx,
    })
}
