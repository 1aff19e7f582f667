use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
        mpsc,
    },
    thread,
};

use libpronet_utils::{ThreadPriority, thread_boot};
use mio::{Events, Interest, Poll, Token, Waker, event::Event};
use tracing::{debug, error, warn};

use crate::{Handler, Mask, handler::RegisteredHandler};

const CMD_TOKEN: Token = Token(usize::MAX);
const EVENTS_CAPACITY: usize = 256;

fn mask_to_interest(mask: Mask) -> Option<Interest> {
    let mut interest: Option<Interest> = None;
    if mask.intersects(Mask::READ | Mask::ACCEPT) {
        interest = Some(Interest::READABLE);
    }
    if mask.intersects(Mask::WRITE | Mask::CONNECT) {
        interest = Some(interest.map_or(Interest::WRITABLE, |i| i | Interest::WRITABLE));
    }
    interest
}

fn event_to_ready(event: &Event, registered: Mask) -> Mask {
    let mut ready = Mask::empty();
    if event.is_readable() {
        ready |= registered & (Mask::READ | Mask::ACCEPT);
    }
    if event.is_writable() {
        ready |= registered & (Mask::WRITE | Mask::CONNECT);
    }
    if event.is_error() || event.is_read_closed() || event.is_write_closed() {
        ready |= Mask::EXCEPTION;
    }
    ready
}

enum Command {
    Register { token: Token, handler: Box<dyn RegisteredHandler>, mask: Mask },
    UpdateMask { token: Token, mask: Mask },
    Remove { token: Token },
    Stop,
}

struct Entry {
    handler: Box<dyn RegisteredHandler>,
    mask: Mask,
}

/// One I/O worker thread: owns a `mio::Poll`, a handler table, and a command
/// inbox woken via `mio::Waker`. All upcalls for handlers bound here run on
/// this thread only, so they serialize without additional locking.
struct Worker {
    sender: mpsc::Sender<Command>,
    waker: Arc<Waker>,
    handle: Option<thread::JoinHandle<()>>,
    handler_count: Arc<AtomicUsize>,
}

impl Worker {
    fn spawn(name: String, core: Option<usize>, priority: ThreadPriority) -> std::io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), CMD_TOKEN)?);
        let (sender, receiver) = mpsc::channel();
        let handler_count = Arc::new(AtomicUsize::new(0));
        let count_for_thread = handler_count.clone();

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                thread_boot(core, priority);
                worker_loop(poll, receiver, count_for_thread, &name);
            })
            .map_err(std::io::Error::other)?;

        Ok(Self { sender, waker, handle: Some(handle), handler_count })
    }

    fn send(&self, cmd: Command) {
        if self.sender.send(cmd).is_ok() {
            let _ = self.waker.wake();
        }
    }

    fn load(&self) -> usize {
        self.handler_count.load(Ordering::Relaxed)
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.send(Command::Stop);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

fn worker_loop(
    mut poll: Poll,
    receiver: mpsc::Receiver<Command>,
    handler_count: Arc<AtomicUsize>,
    name: &str,
) {
    let mut events = Events::with_capacity(EVENTS_CAPACITY);
    let mut table: HashMap<Token, Entry> = HashMap::new();

    'outer: loop {
        if let Err(err) = poll.poll(&mut events, None) {
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            error!(?err, worker = name, "reactor worker poll failed");
            break;
        }

        for event in events.iter() {
            if event.token() == CMD_TOKEN {
                while let Ok(cmd) = receiver.try_recv() {
                    match cmd {
                        Command::Register { token, mut handler, mask } => {
                            if let Some(interest) = mask_to_interest(mask) {
                                if let Err(err) =
                                    poll.registry().register(&mut *handler, token, interest)
                                {
                                    warn!(?err, ?token, "failed to register handler");
                                    continue;
                                }
                            }
                            table.insert(token, Entry { handler, mask });
                            handler_count.fetch_add(1, Ordering::Relaxed);
                        }
                        Command::UpdateMask { token, mask } => {
                            if let Some(entry) = table.get_mut(&token) {
                                entry.mask = mask;
                                if let Some(interest) = mask_to_interest(mask) {
                                    let _ = poll.registry().reregister(
                                        &mut *entry.handler,
                                        token,
                                        interest,
                                    );
                                } else {
                                    let _ = poll.registry().deregister(&mut *entry.handler);
                                }
                            }
                        }
                        Command::Remove { token } => {
                            if let Some(mut entry) = table.remove(&token) {
                                let _ = poll.registry().deregister(&mut *entry.handler);
                                handler_count.fetch_sub(1, Ordering::Relaxed);
                            }
                        }
                        Command::Stop => break 'outer,
                    }
                }
                continue;
            }

            let Some(entry) = table.get_mut(&event.token()) else {
                debug!(token = ?event.token(), "event for unknown token");
                continue;
            };
            let ready = event_to_ready(event, entry.mask);
            if !ready.is_empty() {
                entry.handler.on_event(event.token(), ready);
            }
        }
    }
}

/// Fixed thread pool multiplexing I/O readiness across sockets.
///
/// One dedicated accept thread plus `io_threads` I/O workers. A handler
/// carrying any non-accept mask is bound to a single worker for the
/// lifetime of those masks; its upcalls never migrate or run concurrently
/// with each other.
pub struct Reactor {
    accept: Worker,
    io: Vec<Worker>,
    next_token: AtomicUsize,
    bindings: Mutex<HashMap<Token, (usize, Mask)>>,
}

#[derive(Clone, Copy, Debug)]
pub struct ReactorConfig {
    pub io_threads: usize,
    pub io_priority: ThreadPriority,
    pub accept_priority: ThreadPriority,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            io_threads: 2,
            io_priority: ThreadPriority::OSDefault,
            accept_priority: ThreadPriority::OSDefault,
        }
    }
}

impl Reactor {
    pub fn new(config: ReactorConfig) -> std::io::Result<Self> {
        let accept = Worker::spawn("pronet-accept".into(), None, config.accept_priority)?;
        let io = (0..config.io_threads.max(1))
            .map(|i| Worker::spawn(format!("pronet-io-{i}"), None, config.io_priority))
            .collect::<std::io::Result<Vec<_>>>()?;
        Ok(Self { accept, io, next_token: AtomicUsize::new(0), bindings: Mutex::new(HashMap::new()) })
    }

    pub fn alloc_token(&self) -> Token {
        Token(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    fn least_loaded_io(&self) -> usize {
        self.io
            .iter()
            .enumerate()
            .min_by_key(|(_, w)| w.load())
            .map(|(i, _)| i)
            .expect("reactor always has at least one io worker")
    }

    /// Registers `handler` (which owns its socket) for `mask`, using a
    /// pre-allocated token. Accept-masked handlers are pinned to the
    /// dedicated accept thread; everything else is hashed onto the I/O
    /// worker with the fewest bound handlers.
    pub fn add_handler_with_token<H>(&self, token: Token, handler: H, mask: Mask)
    where
        H: RegisteredHandler + 'static,
    {
        let worker_idx = if mask.contains(Mask::ACCEPT) { usize::MAX } else { self.least_loaded_io() };
        self.bindings.lock().unwrap().insert(token, (worker_idx, mask));
        self.worker_at(worker_idx).send(Command::Register { token, handler: Box::new(handler), mask });
    }

    /// Allocates a fresh token and registers `handler` under it.
    pub fn add_handler<H>(&self, handler: H, mask: Mask) -> Token
    where
        H: RegisteredHandler + 'static,
    {
        let token = self.alloc_token();
        self.add_handler_with_token(token, handler, mask);
        token
    }

    /// Clears the given mask bits on `token`. When the residual mask is
    /// empty the handler's worker binding is released.
    pub fn remove_handler(&self, token: Token, mask: Mask) {
        let mut bindings = self.bindings.lock().unwrap();
        let Some((worker_idx, current)) = bindings.get_mut(&token) else { return };
        let residual = *current - mask;
        if residual.is_empty() {
            let worker_idx = *worker_idx;
            bindings.remove(&token);
            drop(bindings);
            self.worker_at(worker_idx).send(Command::Remove { token });
        } else {
            *current = residual;
            let (worker_idx, residual) = (*worker_idx, residual);
            drop(bindings);
            self.worker_at(worker_idx).send(Command::UpdateMask { token, mask: residual });
        }
    }

    /// Sets `token`'s interest mask to exactly `mask` (as opposed to
    /// [`Reactor::remove_handler`], which only ever shrinks it). Used to
    /// re-arm bits that were previously cleared, e.g. `resume_recv`.
    pub fn set_mask(&self, token: Token, mask: Mask) {
        let mut bindings = self.bindings.lock().unwrap();
        let Some(entry) = bindings.get_mut(&token) else { return };
        entry.1 = mask;
        let worker_idx = entry.0;
        drop(bindings);
        self.worker_at(worker_idx).send(Command::UpdateMask { token, mask });
    }

    fn worker_at(&self, idx: usize) -> &Worker {
        if idx == usize::MAX { &self.accept } else { &self.io[idx] }
    }
}
