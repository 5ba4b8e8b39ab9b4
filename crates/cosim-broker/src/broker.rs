//! Broker base
//!
//! The runtime shared by every broker and core node: a single dispatcher
//! task popping one command at a time from the two-lane queue, a tick timer
//! acting as a liveness watchdog, the logger, and the node identity.
//! Concrete brokers and cores plug their semantics in through the
//! [`CommandProcessor`] trait; the base guarantees the hooks run only on the
//! dispatcher task.
//!
//! States: `Created -> Configured -> Running -> Terminating -> Done`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use cosim_core::config::log_level;
use cosim_core::{
    generate_identifier, Action, ActionMessage, CommandQueue, CoreConfig, CoreError, CoreResult,
    MessageSender, NodeId, NodeIdentity, ERROR_FLAG,
};

use crate::logging::{LogCallback, Logger};
use crate::time::TimeCoordinator;

// ----------------------------------------------------------------------------
// Broker State
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    Created,
    Configured,
    Running,
    Terminating,
    Done,
}

impl std::fmt::Display for BrokerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BrokerState::Created => "created",
            BrokerState::Configured => "configured",
            BrokerState::Running => "running",
            BrokerState::Terminating => "terminating",
            BrokerState::Done => "done",
        };
        write!(f, "{name}")
    }
}

// ----------------------------------------------------------------------------
// Command Processor Hook
// ----------------------------------------------------------------------------

/// Shared state handed to every processor hook.
pub struct BrokerContext {
    /// The node's view of federation time. Time-coordination commands are
    /// routed here by the base before the processor sees anything.
    pub time: TimeCoordinator,
    pub logger: Arc<Logger>,
    /// Loops back into the owning broker's queue.
    pub sender: MessageSender,
    pub identifier: String,
    pub global_id: NodeId,
}

/// The semantics of a concrete broker or core.
///
/// All hooks are invoked from the dispatcher task only; implementations
/// never need their own locking for state they own exclusively.
#[async_trait]
pub trait CommandProcessor: Send {
    /// Handle one normal-lane command. Ticks arrive here only when no other
    /// traffic was seen for a full tick interval.
    async fn process_command(
        &mut self,
        command: ActionMessage,
        ctx: &mut BrokerContext,
    ) -> CoreResult<()>;

    /// Handle one priority-lane command (handshake and registration
    /// traffic).
    async fn process_priority_command(
        &mut self,
        command: ActionMessage,
        ctx: &mut BrokerContext,
    ) -> CoreResult<()> {
        let _ = (command, ctx);
        Ok(())
    }

    /// Orderly-disconnect hook, invoked once after a `Stop` command.
    async fn process_disconnect(&mut self, ctx: &mut BrokerContext) -> CoreResult<()> {
        let _ = ctx;
        Ok(())
    }

    /// Attempt to re-establish a silent parent connection; consulted on a
    /// liveness tick. Returning `true` absorbs the tick.
    fn try_reconnect(&mut self) -> bool {
        false
    }
}

// ----------------------------------------------------------------------------
// Tick Timer
// ----------------------------------------------------------------------------

/// The liveness watchdog: a timer task whose only job is to enqueue `Tick`.
///
/// The shared `active` cell outlives the dispatcher so an in-flight firing
/// observes "inactive" during teardown and enqueues nothing.
struct TickTimer {
    queue: Arc<CommandQueue>,
    interval: Duration,
    active: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl TickTimer {
    fn spawn(queue: Arc<CommandQueue>, interval: Duration, active: Arc<AtomicBool>) -> Self {
        active.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(Self::run(Arc::clone(&queue), interval, Arc::clone(&active)));
        Self {
            queue,
            interval,
            active,
            handle,
        }
    }

    async fn run(queue: Arc<CommandQueue>, interval: Duration, active: Arc<AtomicBool>) {
        loop {
            tokio::time::sleep(interval).await;
            if !active.load(Ordering::SeqCst) {
                return;
            }
            queue.push(ActionMessage::new(Action::Tick));
        }
    }

    /// Tear the timer task down and build a fresh one. The queue survives.
    fn restart(&mut self) {
        self.handle.abort();
        self.handle = tokio::spawn(Self::run(
            Arc::clone(&self.queue),
            self.interval,
            Arc::clone(&self.active),
        ));
    }

    fn cancel(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.handle.abort();
    }
}

// ----------------------------------------------------------------------------
// Dispatch Task
// ----------------------------------------------------------------------------

struct DispatchTask {
    queue: Arc<CommandQueue>,
    processor: Box<dyn CommandProcessor>,
    ctx: BrokerContext,
    ticker: TickTimer,
    connected: Arc<AtomicBool>,
    main_loop_running: Arc<AtomicBool>,
    dump_log: bool,
    dump_messages: Vec<ActionMessage>,
    messages_since_tick: u32,
    halted: bool,
}

impl DispatchTask {
    async fn run(mut self) -> CoreResult<()> {
        loop {
            let command = self.queue.pop().await;
            if self.dump_log {
                self.dump_messages.push(command.clone());
            }
            match command.action {
                Action::Tick => {
                    let errored = command.has_flag(ERROR_FLAG);
                    if self.messages_since_tick == 0 && !self.processor.try_reconnect() {
                        // secondary liveness action: the processor sees the
                        // tick only when nothing else arrived in a full
                        // interval
                        if let Err(error) = self
                            .processor
                            .process_command(command, &mut self.ctx)
                            .await
                        {
                            self.log_error("tick processing", &error);
                        }
                    }
                    if errored {
                        self.ticker.restart();
                    }
                    self.messages_since_tick = 0;
                }
                Action::Ignore => {}
                Action::TerminateImmediately => {
                    self.terminate();
                    return Ok(());
                }
                Action::Stop => {
                    if self.halted {
                        self.terminate();
                        return Ok(());
                    }
                    self.halted = true;
                    if let Err(error) = self
                        .processor
                        .process_command(command, &mut self.ctx)
                        .await
                    {
                        self.log_error("stop processing", &error);
                    }
                    self.terminate();
                    return self.processor.process_disconnect(&mut self.ctx).await;
                }
                Action::Error if command.has_flag(ERROR_FLAG) => {
                    self.ctx.logger.log(
                        log_level::ERROR,
                        &self.ctx.identifier,
                        "terminating on error-flagged command",
                    );
                    self.terminate();
                    return Err(CoreError::transport(
                        "connection timeout or transport failure",
                    ));
                }
                _ => {
                    if self.halted {
                        continue;
                    }
                    self.messages_since_tick += 1;
                    if command.action == Action::ConnectAck {
                        self.connected.store(true, Ordering::SeqCst);
                    }
                    if let Err(error) = self.dispatch(command).await {
                        if error.is_fatal() {
                            self.log_error("fatal command", &error);
                            self.terminate();
                            return Err(error);
                        }
                        self.log_error("command processing", &error);
                    }
                }
            }
        }
    }

    /// Route one command: time actions go to the coordinator, everything
    /// else to the processor's lane-specific hook.
    async fn dispatch(&mut self, command: ActionMessage) -> CoreResult<()> {
        if command.action.is_time_action() && self.ctx.time.process_message(&command)? {
            return Ok(());
        }
        if command.is_priority() {
            self.processor
                .process_priority_command(command, &mut self.ctx)
                .await
        } else {
            self.processor.process_command(command, &mut self.ctx).await
        }
    }

    fn log_error(&self, context: &str, error: &CoreError) {
        self.ctx.logger.log(
            log_level::ERROR,
            &self.ctx.identifier,
            &format!("{context}: {error}"),
        );
    }

    fn terminate(&mut self) {
        self.ticker.cancel();
        self.main_loop_running.store(false, Ordering::SeqCst);
        self.flush_dump_log();
        self.ctx.logger.flush();
    }

    fn flush_dump_log(&self) {
        if !self.dump_log {
            return;
        }
        for message in &self.dump_messages {
            self.ctx.logger.log(
                log_level::DUMP,
                &self.ctx.identifier,
                &format!(
                    "|| dl cmd:{} from {} to {}",
                    message, message.source, message.dest
                ),
            );
        }
    }
}

// ----------------------------------------------------------------------------
// Broker Base
// ----------------------------------------------------------------------------

/// The runtime owner: queue, logger, ticker, dispatcher, identity.
pub struct BrokerBase {
    config: CoreConfig,
    identity: NodeIdentity,
    state: BrokerState,
    expect_parent: bool,
    queue: Arc<CommandQueue>,
    logger: Option<Arc<Logger>>,
    dispatch_handle: Option<JoinHandle<CoreResult<()>>>,
    watchdog_handle: Option<JoinHandle<()>>,
    tick_active: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    main_loop_running: Arc<AtomicBool>,
}

impl BrokerBase {
    pub fn new(config: CoreConfig) -> Self {
        Self {
            identity: NodeIdentity::named(config.identifier.clone()),
            config,
            state: BrokerState::Created,
            expect_parent: false,
            queue: Arc::new(CommandQueue::new()),
            logger: None,
            dispatch_handle: None,
            watchdog_handle: None,
            tick_active: Arc::new(AtomicBool::new(false)),
            connected: Arc::new(AtomicBool::new(false)),
            main_loop_running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> BrokerState {
        self.state
    }

    pub fn identifier(&self) -> &str {
        &self.identity.identifier
    }

    pub fn global_id(&self) -> NodeId {
        self.identity.global_id
    }

    /// Record the id assigned by the parent broker during the handshake.
    pub fn set_global_id(&mut self, id: NodeId) {
        self.identity.assign_global_id(id);
    }

    /// Replace the identifier with a freshly generated one.
    pub fn generate_new_identifier(&mut self) {
        self.identity.identifier = generate_identifier();
    }

    /// Arm the parent-connection watchdog: if no `ConnectAck` arrives
    /// within the configured timeout, an error-flagged command is injected
    /// and the loop terminates.
    pub fn expect_parent_connection(&mut self, expect: bool) {
        self.expect_parent = expect;
    }

    /// Resolve the identity and open the logger.
    pub fn configure(&mut self) -> CoreResult<()> {
        self.ensure_state(BrokerState::Created)?;
        self.config.validate()?;
        if self.identity.identifier.is_empty() && !self.config.no_automatic_id {
            self.identity.identifier = generate_identifier();
        }
        self.logger = Some(Arc::new(Logger::new(&self.config.logging)?));
        self.state = BrokerState::Configured;
        Ok(())
    }

    /// Install a user log sink; takes precedence over the built-in sinks
    /// and halts file logging.
    pub fn set_logger_callback(&self, callback: Option<LogCallback>) -> CoreResult<()> {
        let logger = self.logger.as_ref().ok_or(CoreError::InvalidBrokerState {
            state: self.state.to_string(),
        })?;
        logger.set_callback(callback);
        Ok(())
    }

    /// Spawn the dispatcher and the tick watchdog.
    pub fn start(&mut self, processor: Box<dyn CommandProcessor>) -> CoreResult<()> {
        self.ensure_state(BrokerState::Configured)?;
        let logger = self
            .logger
            .clone()
            .ok_or(CoreError::InvalidBrokerState {
                state: self.state.to_string(),
            })?;

        let sender = MessageSender::from_queue(&self.queue);
        let ctx = BrokerContext {
            time: TimeCoordinator::new(sender.clone()),
            logger,
            sender,
            identifier: self.identity.identifier.clone(),
            global_id: self.identity.global_id,
        };
        let ticker = TickTimer::spawn(
            Arc::clone(&self.queue),
            self.config.tick,
            Arc::clone(&self.tick_active),
        );

        if self.expect_parent {
            let connected = Arc::clone(&self.connected);
            let queue = Arc::clone(&self.queue);
            let timeout = self.config.timeout;
            self.watchdog_handle = Some(tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if !connected.load(Ordering::SeqCst) {
                    queue.push(ActionMessage::new(Action::Error).with_flag(ERROR_FLAG));
                }
            }));
        }

        self.main_loop_running.store(true, Ordering::SeqCst);
        let task = DispatchTask {
            queue: Arc::clone(&self.queue),
            processor,
            ctx,
            ticker,
            connected: Arc::clone(&self.connected),
            main_loop_running: Arc::clone(&self.main_loop_running),
            dump_log: self.config.logging.dump_log,
            dump_messages: Vec::new(),
            messages_since_tick: 0,
            halted: false,
        };
        self.dispatch_handle = Some(tokio::spawn(task.run()));
        self.state = BrokerState::Running;
        Ok(())
    }

    /// Enqueue a command from any thread, honouring lane classification.
    pub fn add_action_message(&self, message: ActionMessage) {
        self.queue.submit(message);
    }

    /// A sender routing into this broker's queue.
    pub fn sender(&self) -> MessageSender {
        MessageSender::from_queue(&self.queue)
    }

    /// Whether the dispatcher is still consuming commands.
    pub fn is_running(&self) -> bool {
        self.main_loop_running.load(Ordering::SeqCst)
    }

    /// Forward a log message if this node owns the federate's log stream:
    /// the call proceeds for id 0, an unset id, or this node's own global
    /// id.
    pub fn send_to_logger(&self, federate: NodeId, level: i32, name: &str, message: &str) -> bool {
        let owned = federate == NodeId::ROOT
            || federate == NodeId::UNSET
            || federate == self.identity.global_id;
        if !owned {
            return false;
        }
        if let Some(logger) = &self.logger {
            logger.log(level, name, message);
        }
        true
    }

    /// Push the hard-cancel sentinel and wait for the dispatcher to exit.
    pub async fn shutdown(&mut self) -> CoreResult<()> {
        self.state = BrokerState::Terminating;
        if let Some(handle) = self.watchdog_handle.take() {
            handle.abort();
        }
        let result = match self.dispatch_handle.take() {
            Some(handle) => {
                self.queue.push(ActionMessage::new(Action::TerminateImmediately));
                handle
                    .await
                    .map_err(|e| CoreError::channel(format!("dispatcher task failed: {e}")))?
            }
            None => Ok(()),
        };
        self.state = BrokerState::Done;
        result
    }

    /// Wait for the dispatcher to exit on its own (after a `Stop` or a
    /// fatal error) without injecting a terminate.
    pub async fn join(&mut self) -> CoreResult<()> {
        let result = match self.dispatch_handle.take() {
            Some(handle) => handle
                .await
                .map_err(|e| CoreError::channel(format!("dispatcher task failed: {e}")))?,
            None => Ok(()),
        };
        self.state = BrokerState::Done;
        result
    }

    fn ensure_state(&self, expected: BrokerState) -> CoreResult<()> {
        if self.state != expected {
            return Err(CoreError::InvalidBrokerState {
                state: self.state.to_string(),
            });
        }
        Ok(())
    }
}

impl Drop for BrokerBase {
    fn drop(&mut self) {
        // the active cell goes false first so an in-flight tick callback
        // observes "inactive" and enqueues nothing
        self.tick_active.store(false, Ordering::SeqCst);
        if let Some(handle) = &self.watchdog_handle {
            handle.abort();
        }
        if let Some(handle) = &self.dispatch_handle {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for BrokerBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerBase")
            .field("identifier", &self.identity.identifier)
            .field("state", &self.state)
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}
