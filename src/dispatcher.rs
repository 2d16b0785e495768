//! Two work queues, each drained by one dedicated thread.
//!
//! The serial worker owns the [`Hm305`] and with it the link, so hardware
//! exchanges happen strictly one at a time and in submission order. The fast
//! worker only holds the shared [`Setpoints`] and answers cache-only commands
//! without waiting behind the serial queue.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::JoinHandle,
    time::Duration,
};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info};

use crate::{
    command::{ApplyGuards, Command, Lane},
    config::{DispatcherConfig, to_std},
    error::DispatchError,
    psu::{Hm305, Setpoints},
};

#[derive(Default)]
struct QueueState {
    items: VecDeque<Arc<Command>>,
    /// Pushed but not yet marked done.
    unfinished: usize,
    closed: bool,
}

enum Pop {
    Item(Arc<Command>),
    Idle,
    Closed,
}

/// A FIFO with `task_done`/`join` bookkeeping.
#[derive(Default)]
struct WorkQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    drained: Condvar,
}

impl WorkQueue {
    fn push(&self, command: Arc<Command>) -> Result<(), DispatchError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(DispatchError::ShuttingDown);
        }
        command.mark_enqueued();
        state.items.push_back(command);
        state.unfinished += 1;
        self.available.notify_one();
        Ok(())
    }

    /// Wait up to `timeout` for work. Queued work is still handed out after close.
    fn pop_timeout(&self, timeout: Duration) -> Pop {
        let mut state = self.state.lock();
        if state.items.is_empty() && !state.closed {
            self.available.wait_for(&mut state, timeout);
        }
        match state.items.pop_front() {
            Some(command) => Pop::Item(command),
            None if state.closed => Pop::Closed,
            None => Pop::Idle,
        }
    }

    fn task_done(&self) {
        let mut state = self.state.lock();
        state.unfinished = state.unfinished.saturating_sub(1);
        if state.unfinished == 0 {
            self.drained.notify_all();
        }
    }

    fn join(&self) {
        let mut state = self.state.lock();
        while state.unfinished > 0 {
            self.drained.wait(&mut state);
        }
    }

    fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }

    fn len(&self) -> usize {
        self.state.lock().items.len()
    }
}

/// Routes commands to the serial or fast worker.
pub struct Dispatcher {
    serial: Arc<WorkQueue>,
    fast: Arc<WorkQueue>,
    guards: Arc<ApplyGuards>,
    shutting_down: AtomicBool,
    workers: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    /// Spawn both workers. The serial worker takes ownership of `psu`.
    pub fn start<S, const L: usize>(
        psu: Hm305<S, L>,
        config: &DispatcherConfig,
    ) -> Result<Self, DispatchError>
    where
        S: embedded_io::Read + embedded_io::Write + Send + 'static,
    {
        let tick = to_std(config.idle_tick);
        let serial = Arc::new(WorkQueue::default());
        let fast = Arc::new(WorkQueue::default());
        let setpoints = Arc::clone(psu.setpoints());

        let mut dispatcher = Self {
            serial: Arc::clone(&serial),
            fast: Arc::clone(&fast),
            guards: ApplyGuards::new(),
            shutting_down: AtomicBool::new(false),
            workers: Vec::with_capacity(2),
        };

        let handle = std::thread::Builder::new()
            .name("hm305-serial".into())
            .spawn(move || serial_worker(psu, &serial, tick))?;
        dispatcher.workers.push(handle);

        let handle = std::thread::Builder::new()
            .name("hm305-fast".into())
            .spawn(move || fast_worker(&setpoints, &fast, tick))?;
        dispatcher.workers.push(handle);

        info!("dispatcher started");
        Ok(dispatcher)
    }

    /// Flags shared with the [`CommandFactory`](crate::factory::CommandFactory).
    pub fn apply_guards(&self) -> &Arc<ApplyGuards> {
        &self.guards
    }

    /// Queue `command` on the lane it belongs to.
    pub fn submit(&self, command: Arc<Command>) -> Result<(), DispatchError> {
        self.submit_to(command.lane(), command)
    }

    /// Queue `command` on a specific lane. Cache-only commands may go on the
    /// serial lane; the reverse is refused.
    pub fn submit_to(&self, lane: Lane, command: Arc<Command>) -> Result<(), DispatchError> {
        if self.is_shutting_down() {
            return Err(DispatchError::ShuttingDown);
        }
        if lane == Lane::Fast && command.uses_serial_port() {
            error!("{:?} cannot be placed in the fast queue", command.kind());
            return Err(DispatchError::QueueMisuse(format!("{:?}", command.kind())));
        }
        debug!("enqueue {:?} on {:?}", command.kind(), lane);
        self.queue(lane).push(command)
    }

    /// Submit and block until a worker has completed the command.
    pub fn execute(&self, command: Arc<Command>) -> Result<Arc<Command>, DispatchError> {
        self.submit(Arc::clone(&command))?;
        command.wait();
        Ok(command)
    }

    /// Block until `lane` has no unfinished work.
    pub fn drain(&self, lane: Lane) {
        self.queue(lane).join();
    }

    /// Commands waiting on `lane`, not counting the one being worked on.
    pub fn pending(&self, lane: Lane) -> usize {
        self.queue(lane).len()
    }

    /// Refuse new work. Workers finish what is queued and then exit.
    pub fn shutdown(&self) {
        if !self.shutting_down.swap(true, Ordering::AcqRel) {
            info!("dispatcher shutting down");
        }
        self.serial.close();
        self.fast.close();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    fn queue(&self, lane: Lane) -> &WorkQueue {
        match lane {
            Lane::Serial => &self.serial,
            Lane::Fast => &self.fast,
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("worker thread panicked");
            }
        }
    }
}

fn serial_worker<S, const L: usize>(mut psu: Hm305<S, L>, queue: &WorkQueue, tick: Duration)
where
    S: embedded_io::Read + embedded_io::Write,
{
    debug!("serial worker started");
    loop {
        match queue.pop_timeout(tick) {
            Pop::Item(command) => {
                if command.is_stale() {
                    debug!("stale item {:?}", command.kind());
                    command.skip();
                } else {
                    debug!("processing {:?}", command.kind());
                    command.invoke_serial(&mut psu);
                }
                queue.task_done();
            }
            Pop::Idle => continue,
            Pop::Closed => break,
        }
    }
    debug!("serial worker stopped");
}

fn fast_worker(setpoints: &Setpoints, queue: &WorkQueue, tick: Duration) {
    debug!("fast worker started");
    loop {
        match queue.pop_timeout(tick) {
            Pop::Item(command) => {
                if command.is_stale() {
                    debug!("stale item {:?}", command.kind());
                    command.skip();
                } else {
                    debug!("processing {:?}", command.kind());
                    command.invoke_fast(setpoints);
                }
                queue.task_done();
            }
            Pop::Idle => continue,
            Pop::Closed => break,
        }
    }
    debug!("fast worker stopped");
}
