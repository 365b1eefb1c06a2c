//! The cooperative socket/timeout reactor (C5, spec §4.7): one I/O thread
//! multiplexing readiness-based sockets against [`crate::timeout::TimeoutManager`]
//! deadlines, evicting connections idle past `idle_timeout`.
//!
//! `mio::Poll` stands in for the kqueue/select abstraction and `mio::Waker`
//! for the self-pipe; both are wakeup mechanisms this module only calls
//! through, never implements directly.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use mio::event::Source;
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use tracing::{debug, warn};

use crate::timeout::{TimeoutId, TimeoutManager};

const WAKE_TOKEN: Token = Token(usize::MAX);

/// Default idle-eviction window (spec §4.7: "`idle_timeout` (default 30s)").
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Invoked when a registered source reports readable. Returning `false`
/// tells the reactor to deregister and drop the entry (spec §4.7 step 4);
/// an `Err` does the same without disturbing any other registration (spec
/// §7: "Reactor `onReadable` returning error removes the socket only").
pub trait Readable: Send {
    fn on_readable(&self) -> io::Result<bool>;
}

struct Entry {
    source: Box<dyn Source + Send>,
    handler: Box<dyn Readable>,
    last_activity: Instant,
    close_on_idle: bool,
}

/// A single-threaded readiness-based event loop (spec §4.7).
///
/// `add`/`remove`/`changed` may be called from any thread and synchronously
/// update registration; only [`Reactor::run`] blocks on readiness, and it is
/// meant to run on one dedicated thread.
pub struct Reactor {
    poll: Mutex<Poll>,
    waker: Waker,
    entries: Mutex<HashMap<Token, Entry>>,
    next_token: Mutex<usize>,
    timeouts: Mutex<TimeoutManager>,
    idle_timeout: Duration,
    stop: AtomicBool,
}

impl Reactor {
    /// A reactor with no registrations, evicting `closeOnIdle` sockets
    /// after `idle_timeout` of inactivity.
    pub fn new(idle_timeout: Duration) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN)?;
        Ok(Self {
            poll: Mutex::new(poll),
            waker,
            entries: Mutex::new(HashMap::new()),
            next_token: Mutex::new(0),
            timeouts: Mutex::new(TimeoutManager::new()),
            idle_timeout,
            stop: AtomicBool::new(false),
        })
    }

    fn alloc_token(&self) -> Token {
        let mut next = self.next_token.lock().unwrap();
        loop {
            let candidate = Token(*next);
            *next = next.wrapping_add(1);
            if candidate != WAKE_TOKEN {
                return candidate;
            }
        }
    }

    /// Register `source` for readability, invoking `handler` whenever it
    /// becomes readable (spec §4.7 `add`). `close_on_idle` marks the entry
    /// eligible for step 1's idle eviction.
    pub fn add(
        &self,
        mut source: Box<dyn Source + Send>,
        handler: Box<dyn Readable>,
        close_on_idle: bool,
    ) -> io::Result<Token> {
        let token = self.alloc_token();
        self.poll
            .lock()
            .unwrap()
            .registry()
            .register(&mut *source, token, Interest::READABLE)?;
        self.entries.lock().unwrap().insert(
            token,
            Entry {
                source,
                handler,
                last_activity: Instant::now(),
                close_on_idle,
            },
        );
        self.wake();
        Ok(token)
    }

    /// Deregister and drop a previously-added source (spec §4.7 `remove`).
    pub fn remove(&self, token: Token) {
        let removed = self.entries.lock().unwrap().remove(&token);
        if let Some(mut entry) = removed {
            let poll = self.poll.lock().unwrap();
            let _ = entry.source.deregister(poll.registry());
        }
        self.wake();
    }

    /// Re-register `token`'s interest set, e.g. after a socket swap (spec
    /// §4.7 `changed`; used by [`crate::channel::reconnect::ReconnectChannel`]
    /// to update the reactor after reconnecting).
    pub fn changed(&self, token: Token, interest: Interest) -> io::Result<()> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .get_mut(&token)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "unknown reactor token"))?;
        let poll = self.poll.lock().unwrap();
        entry.source.reregister(poll.registry(), token, interest)?;
        drop(poll);
        entry.last_activity = Instant::now();
        Ok(())
    }

    /// Schedule `f` to run at `deadline` (spec §4.7 timeout manager `add`),
    /// waking a blocked `run` loop so it recomputes its wait.
    pub fn schedule_timeout(&self, deadline: Instant, f: impl FnOnce() + Send + 'static) -> TimeoutId {
        let id = self.timeouts.lock().unwrap().add(deadline, f);
        self.wake();
        id
    }

    /// Cancel a previously scheduled timeout (spec §4.7 `cancel`).
    pub fn cancel_timeout(&self, id: TimeoutId) {
        self.timeouts.lock().unwrap().cancel(id);
    }

    /// Unblock a `run` loop currently waiting on readiness, via `mio::Waker`
    /// (the self-pipe of spec §4.7).
    pub fn wake(&self) {
        let _ = self.waker.wake();
    }

    /// Ask `run` to return after its current iteration.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.wake();
    }

    /// Run the event loop until [`Reactor::stop`] is called. Intended to
    /// occupy one dedicated thread for the reactor's lifetime.
    pub fn run(&self) -> io::Result<()> {
        let mut events = Events::with_capacity(128);

        while !self.stop.load(Ordering::SeqCst) {
            // Step 1: evict idle sockets.
            let now = Instant::now();
            let expired: Vec<Token> = {
                let entries = self.entries.lock().unwrap();
                entries
                    .iter()
                    .filter(|(_, e)| e.close_on_idle && now.duration_since(e.last_activity) >= self.idle_timeout)
                    .map(|(t, _)| *t)
                    .collect()
            };
            for token in expired {
                debug!(?token, "evicting idle socket");
                self.remove(token);
            }

            // Step 2: next wake = min(idle_timeout, timeout-manager next deadline).
            let idle_wake = now + self.idle_timeout;
            let wake_at = self
                .timeouts
                .lock()
                .unwrap()
                .next_deadline()
                .map_or(idle_wake, |d| d.min(idle_wake));
            let poll_timeout = wake_at.saturating_duration_since(Instant::now());

            // Step 3: block on readiness.
            match self.poll.lock().unwrap().poll(&mut events, Some(poll_timeout)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            // Step 4: fire due timers, then deliver readiness to each source.
            self.timeouts.lock().unwrap().update(Instant::now());

            for event in events.iter() {
                // Step 5: the self-pipe wakeup itself carries no payload to
                // drain under `mio::Waker` - its only job was to unblock
                // `poll` above, which it already did.
                if event.token() == WAKE_TOKEN {
                    continue;
                }

                let outcome = {
                    let mut entries = self.entries.lock().unwrap();
                    match entries.get_mut(&event.token()) {
                        Some(entry) => {
                            entry.last_activity = Instant::now();
                            Some(entry.handler.on_readable())
                        }
                        None => None,
                    }
                };

                match outcome {
                    Some(Ok(true)) => {}
                    Some(Ok(false)) => self.remove(event.token()),
                    Some(Err(e)) => {
                        warn!(error = %e, token = ?event.token(), "socket error, removing");
                        self.remove(event.token());
                    }
                    None => {}
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};

    struct SharedListener(Arc<StdMutex<mio::net::TcpListener>>);

    impl Source for SharedListener {
        fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
            self.0.lock().unwrap().register(registry, token, interests)
        }
        fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
            self.0.lock().unwrap().reregister(registry, token, interests)
        }
        fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
            self.0.lock().unwrap().deregister(registry)
        }
    }

    struct AcceptOnce {
        listener: Arc<StdMutex<mio::net::TcpListener>>,
        accepted: Arc<AtomicBool>,
    }

    impl Readable for AcceptOnce {
        fn on_readable(&self) -> io::Result<bool> {
            self.listener.lock().unwrap().accept()?;
            self.accepted.store(true, Ordering::SeqCst);
            Ok(false)
        }
    }

    #[test]
    fn readiness_event_invokes_handler_and_removes_it() {
        let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        std_listener.set_nonblocking(true).unwrap();
        let addr = std_listener.local_addr().unwrap();
        let listener = Arc::new(StdMutex::new(mio::net::TcpListener::from_std(std_listener)));

        let reactor = Arc::new(Reactor::new(Duration::from_secs(30)).unwrap());
        let accepted = Arc::new(AtomicBool::new(false));
        let token = reactor
            .add(
                Box::new(SharedListener(Arc::clone(&listener))),
                Box::new(AcceptOnce {
                    listener: Arc::clone(&listener),
                    accepted: Arc::clone(&accepted),
                }),
                false,
            )
            .unwrap();
        assert_eq!(token, Token(0));

        let reactor_for_run = Arc::clone(&reactor);
        let run_thread = std::thread::spawn(move || reactor_for_run.run());

        let _client = std::net::TcpStream::connect(addr).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while !accepted.load(Ordering::SeqCst) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(accepted.load(Ordering::SeqCst));

        reactor.stop();
        run_thread.join().unwrap().unwrap();
    }

    #[test]
    fn stop_unblocks_a_waiting_run_loop() {
        let reactor = Arc::new(Reactor::new(Duration::from_secs(30)).unwrap());
        let reactor_for_run = Arc::clone(&reactor);
        let run_thread = std::thread::spawn(move || reactor_for_run.run());

        std::thread::sleep(Duration::from_millis(20));
        reactor.stop();
        run_thread.join().unwrap().unwrap();
    }

    #[test]
    fn timeout_fires_and_wakes_the_loop() {
        let reactor = Arc::new(Reactor::new(Duration::from_secs(30)).unwrap());
        let fired = Arc::new(AtomicBool::new(false));
        let fired_for_cb = Arc::clone(&fired);
        reactor.schedule_timeout(Instant::now(), move || {
            fired_for_cb.store(true, Ordering::SeqCst);
        });

        let reactor_for_run = Arc::clone(&reactor);
        let run_thread = std::thread::spawn(move || reactor_for_run.run());

        let deadline = Instant::now() + Duration::from_secs(2);
        while !fired.load(Ordering::SeqCst) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(fired.load(Ordering::SeqCst));

        reactor.stop();
        run_thread.join().unwrap().unwrap();
    }
}
