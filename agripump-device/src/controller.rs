use std::future::{self, Future};
use std::pin::Pin;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, instrument, trace, warn};

use crate::backoff::Backoff;
use crate::command::{Command, CommandError, CommandRequest, CommandResult};
use crate::config::ControlConfig;
use crate::debounce::Debouncer;
use crate::models::{ConnectionStatus, ControlState, DeviceState, MAX_SPEED};
use crate::poll::PollScheduler;
use crate::transport::DeviceTransport;
use crate::util::interrupt::Interrupt;
use crate::util::request::RequestError;

type Outcome = Result<Option<Value>, RequestError>;
type DeviceFuture = Pin<Box<dyn Future<Output = Outcome> + Send>>;
type Reply = oneshot::Sender<CommandResult>;

enum Request {
    Power(bool, Reply),
    ToggleDirection(Reply),
    Speed(u8, Reply),
    Retry,
}

/// Cloneable handle to a mounted control surface
#[derive(Clone)]
pub struct ControlHandle {
    request_tx: mpsc::UnboundedSender<Request>,
    state_rx: watch::Receiver<ControlState>,
}

impl ControlHandle {
    /// Switch the motor on or off
    pub fn power(&self, on: bool) -> CommandRequest {
        self.request(|reply| Request::Power(on, reply))
    }

    /// Reverse the current direction of the motor
    pub fn toggle_direction(&self) -> CommandRequest {
        self.request(Request::ToggleDirection)
    }

    /// Change the speed setpoint.
    ///
    /// The new value is reflected in the published state right away but only
    /// sent to the device once no other change arrives during the debounce
    /// period. The request of a value replaced by a newer one resolves to
    /// `CommandError::Superseded`.
    pub fn set_speed(&self, speed: u8) -> CommandRequest {
        self.request(|reply| Request::Speed(speed, reply))
    }

    /// Poll the device right away, clearing any backoff.
    ///
    /// Returns false if the surface is no longer mounted.
    pub fn retry(&self) -> bool {
        self.request_tx.send(Request::Retry).is_ok()
    }

    /// Latest published state
    pub fn state(&self) -> ControlState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ControlState> {
        self.state_rx.clone()
    }

    fn request(&self, make: impl FnOnce(Reply) -> Request) -> CommandRequest {
        let (result_tx, result_rx) = oneshot::channel();
        // if the surface is gone the reply is dropped with the request and
        // the caller gets `Cancelled`
        let _ = self.request_tx.send(make(result_tx));
        CommandRequest::new(result_rx)
    }
}

/// Owns the background task driving a device.
///
/// Mounting starts polling immediately. Unmounting (or dropping the surface)
/// stops every timer and in-flight request, after which the published state
/// no longer changes.
pub struct ControlSurface {
    handle: ControlHandle,
    shutdown: Interrupt,
    task: Option<JoinHandle<()>>,
}

impl ControlSurface {
    /// Start controlling the device behind `transport`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn mount<T: DeviceTransport>(transport: T, config: ControlConfig) -> Self {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ControlState::default());
        let shutdown = Interrupt::new();

        let controller = Controller::new(transport, &config, state_tx);
        let task = tokio::spawn(controller.run(request_rx, shutdown.clone()));

        Self {
            handle: ControlHandle {
                request_tx,
                state_rx,
            },
            shutdown,
            task: Some(task),
        }
    }

    pub fn handle(&self) -> ControlHandle {
        self.handle.clone()
    }

    pub fn is_mounted(&self) -> bool {
        self.task.is_some()
    }

    /// Stop the surface and wait for the background task to finish
    pub async fn unmount(&mut self) {
        self.shutdown.trigger();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("control task failed: {e}");
            }
        }
    }
}

impl Drop for ControlSurface {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

struct InFlight {
    command: Command,
    interrupt: Interrupt,
    reply: Reply,
}

struct Controller<T> {
    transport: T,
    device: DeviceState,
    connection: ConnectionStatus,
    poll: PollScheduler,
    speed: Debouncer<(u8, Reply)>,
    command: Option<InFlight>,
    state_tx: watch::Sender<ControlState>,
}

impl<T: DeviceTransport> Controller<T> {
    fn new(transport: T, config: &ControlConfig, state_tx: watch::Sender<ControlState>) -> Self {
        Self {
            transport,
            device: DeviceState::default(),
            connection: ConnectionStatus::default(),
            poll: PollScheduler::new(
                config.poll_interval,
                Backoff::new(config.initial_backoff, config.max_backoff),
            ),
            speed: Debouncer::new(config.speed_debounce),
            command: None,
            state_tx,
        }
    }

    #[instrument(name = "control", skip_all)]
    async fn run(mut self, mut request_rx: mpsc::UnboundedReceiver<Request>, shutdown: Interrupt) {
        info!("ready");

        let mut command_future: DeviceFuture = Box::pin(future::pending());
        let mut poll_future = self.start_poll(false);
        self.publish();

        loop {
            let next_poll = self.poll.next_poll();
            // a due speed change waits for the command in flight
            let speed_due = if self.command.is_none() {
                self.speed.deadline()
            } else {
                None
            };

            tokio::select! {
                biased;

                _ = shutdown.wait() => break,

                // Handle poll completion
                outcome = &mut poll_future, if self.poll.is_polling() => {
                    poll_future = Box::pin(future::pending());
                    self.complete_poll(outcome);
                }

                // Handle command completion
                outcome = &mut command_future, if self.command.is_some() => {
                    command_future = Box::pin(future::pending());
                    self.complete_command(outcome);
                }

                // Wake up on the next poll
                _ = sleep_until(next_poll.unwrap_or_else(Instant::now)), if next_poll.is_some() => {
                    poll_future = self.start_poll(false);
                }

                // Send the latest speed once input has settled
                _ = sleep_until(speed_due.unwrap_or_else(Instant::now)), if speed_due.is_some() => {
                    if let Some((speed, reply)) = self.speed.take_due(Instant::now()) {
                        command_future = self.dispatch(Command::Speed(speed), reply);
                    }
                }

                Some(request) = request_rx.recv() => match request {
                    Request::Retry => {
                        debug!("retry requested");
                        // replacing the future drops the poll in flight
                        poll_future = self.start_poll(true);
                    }
                    Request::Power(on, reply) => {
                        if let Some(future) = self.accept(Command::Power(on), reply) {
                            command_future = future;
                        }
                    }
                    Request::ToggleDirection(reply) => {
                        let direction = self.device.direction.toggled();
                        if let Some(future) = self.accept(Command::Direction(direction), reply) {
                            command_future = future;
                        }
                    }
                    Request::Speed(speed, reply) => self.push_speed(speed, reply),
                }
            }

            self.publish();
        }

        self.stop();
    }

    fn start_poll(&mut self, retry: bool) -> DeviceFuture {
        let interrupt = if retry {
            self.poll.retry()
        } else {
            self.poll.begin()
        };

        match interrupt {
            Some(interrupt) => {
                let transport = self.transport.clone();
                Box::pin(async move { transport.get_state(&interrupt).await })
            }
            None => Box::pin(future::pending()),
        }
    }

    fn complete_poll(&mut self, outcome: Outcome) {
        let now = Instant::now();
        match outcome {
            Ok(body) => {
                if let Some(raw) = body {
                    self.device = DeviceState::normalize(&raw, Some(&self.device));
                }
                if !self.connection.connected {
                    info!("device connected");
                }
                self.connection.mark_seen();
                self.poll.succeed(now);
            }
            // only interrupted cycles report cancellation and those are
            // dropped before completing
            Err(e) if e.is_cancelled() => trace!("poll cancelled"),
            Err(e) => {
                self.connection
                    .mark_failed(format!("failed to reach device: {e}"));
                self.poll.fail(now);
                warn!(
                    "poll failed: {e}, retrying in {}ms",
                    self.poll.backoff().as_millis()
                );
            }
        }
    }

    fn check_accepting(&self) -> Result<(), CommandError> {
        if !self.connection.connected {
            return Err(CommandError::Disconnected);
        }
        if self.command.is_some() {
            return Err(CommandError::Busy);
        }
        Ok(())
    }

    fn accept(&mut self, command: Command, reply: Reply) -> Option<DeviceFuture> {
        if let Err(e) = self.check_accepting() {
            debug!("rejecting {command:?}: {e}");
            let _ = reply.send(Err(e));
            return None;
        }
        Some(self.dispatch(command, reply))
    }

    fn push_speed(&mut self, speed: u8, reply: Reply) {
        if let Err(e) = self.check_accepting() {
            debug!("rejecting speed {speed}: {e}");
            let _ = reply.send(Err(e));
            return;
        }

        let speed = speed.min(MAX_SPEED);
        self.device.speed = speed;
        if let Some((previous, superseded)) = self.speed.push((speed, reply), Instant::now()) {
            trace!("speed {previous} superseded by {speed}");
            let _ = superseded.send(Err(CommandError::Superseded));
        }
    }

    fn dispatch(&mut self, command: Command, reply: Reply) -> DeviceFuture {
        debug!("sending {command:?}");

        let interrupt = Interrupt::new();
        self.command = Some(InFlight {
            command,
            interrupt: interrupt.clone(),
            reply,
        });

        let transport = self.transport.clone();
        Box::pin(async move { transport.send(&command, &interrupt).await })
    }

    fn complete_command(&mut self, outcome: Outcome) {
        let Some(InFlight { command, reply, .. }) = self.command.take() else {
            return;
        };

        let result = match outcome {
            Ok(body) => {
                let state = body.map(|raw| {
                    self.device = DeviceState::normalize(&raw, Some(&self.device));
                    self.device
                });
                if !self.connection.connected {
                    info!("device connected");
                }
                self.connection.mark_seen();
                debug!("{command:?} acknowledged");
                Ok(state)
            }
            Err(e) if e.is_cancelled() => Err(CommandError::Cancelled),
            Err(e) => {
                warn!("{command:?} failed: {e}");
                self.connection.mark_failed(e.to_string());
                Err(e.into())
            }
        };

        let _ = reply.send(result);
    }

    fn stop(&mut self) {
        self.poll.stop();

        if let Some(InFlight {
            interrupt, reply, ..
        }) = self.command.take()
        {
            interrupt.trigger();
            let _ = reply.send(Err(CommandError::Cancelled));
        }

        if let Some((speed, reply)) = self.speed.cancel() {
            debug!("dropping pending speed {speed}");
            let _ = reply.send(Err(CommandError::Cancelled));
        }

        self.publish();
        info!("stopped");
    }

    fn publish(&self) {
        let state = ControlState {
            device: self.device,
            connection: self.connection.clone(),
            busy: self.command.is_some(),
            poll: self.poll.status(),
            backoff: self.poll.backoff(),
        };

        self.state_tx.send_if_modified(|current| {
            if *current != state {
                *current = state;
                true
            } else {
                false
            }
        });
    }
}
