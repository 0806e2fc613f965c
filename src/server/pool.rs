//! Dynamic worker pool behind [`Server`](crate::Server).
//!
//! The old fixed-size design spawned exactly `max_connections` workers at
//! startup and kept them alive forever, one per slot in a round-robin queue
//! pop. This one spawns workers on demand up to `max_connections`, keeps
//! recently-used ones in a LIFO idle stack so a bursty load reuses warm
//! workers first, and reclaims workers that have sat idle past
//! [`ServerLimits::max_idle_worker_duration`
//! ](crate::limits::ServerLimits::max_idle_worker_duration) once the pool
//! has more of them than roughly 10% of its high-water mark.
//!
//! `Server` itself stays non-generic: the only place a [`WorkerPool`]'s type
//! parameters exist at runtime is inside the dispatcher task spawned by
//! `ServerBuilder::build`, never as a field on `Server`.

use crate::{
    limits::WaitStrategy,
    server::{
        connection::{ConnectionData, ConnectionFilter, HttpConnection},
        server_impl::{AllLimits, Handler},
    },
};
use std::{
    collections::HashMap,
    marker::PhantomData,
    net::{IpAddr, SocketAddr},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};
use tokio::{
    net::TcpStream,
    sync::mpsc,
    task::yield_now,
    time::{interval, sleep as tokio_sleep},
};

/// Tracks how many connections are currently open per remote IP, for
/// `ServerLimits::max_conns_per_ip`. A guard decrements its entry on drop so
/// the count stays accurate regardless of how the connection exits —
/// including a connection handed off to a worker task, where the guard now
/// travels inside the dispatched [`Job`] instead of being dropped at
/// admission time.
pub(crate) type IpConnCounts = Arc<Mutex<HashMap<IpAddr, usize>>>;

pub(crate) struct IpConnGuard {
    counts: IpConnCounts,
    ip: IpAddr,
}

impl IpConnGuard {
    /// Returns `None` (admitting no guard) if `limit` is non-zero and the IP
    /// is already at capacity; `limit == 0` means unlimited.
    pub(crate) fn try_acquire(counts: &IpConnCounts, ip: IpAddr, limit: usize) -> Option<Self> {
        let mut guard = counts.lock().unwrap();
        let count = guard.entry(ip).or_insert(0);

        if limit != 0 && *count >= limit {
            return None;
        }

        *count += 1;
        Some(Self {
            counts: counts.clone(),
            ip,
        })
    }
}

impl Drop for IpConnGuard {
    fn drop(&mut self) {
        let mut guard = self.counts.lock().unwrap();
        if let Some(count) = guard.get_mut(&self.ip) {
            *count -= 1;
            if *count == 0 {
                guard.remove(&self.ip);
            }
        }
    }
}

/// An accepted, admitted connection handed from the dispatcher to a worker.
/// The `IpConnGuard` rides along so the per-IP count stays held for the
/// connection's whole lifetime, not just the admission check.
pub(crate) type Job = (TcpStream, SocketAddr, SocketAddr, IpConnGuard);

struct WorkerSlot {
    tx: mpsc::Sender<Job>,
    idle_since: Mutex<Instant>,
}

pub(crate) struct WorkerPool<H: Handler<S>, S: ConnectionData, F: ConnectionFilter> {
    /// Workers that finished their last connection and are waiting for
    /// another, most-recently-idle last (LIFO: `Vec::pop` takes the back).
    ready: Mutex<Vec<Arc<WorkerSlot>>>,
    workers_started: AtomicUsize,
    high_water: AtomicUsize,
    max_workers: usize,

    pub(crate) handler: Arc<H>,
    pub(crate) filter: Arc<F>,
    pub(crate) limits: AllLimits,
    _connection_data: PhantomData<fn() -> S>,
}

impl<H: Handler<S>, S: ConnectionData, F: ConnectionFilter> WorkerPool<H, S, F> {
    pub(crate) fn new(handler: Arc<H>, filter: Arc<F>, limits: AllLimits, max_workers: usize) -> Arc<Self> {
        Arc::new(Self {
            ready: Mutex::new(Vec::new()),
            workers_started: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
            max_workers: max_workers.max(1),
            handler,
            filter,
            limits,
            _connection_data: PhantomData,
        })
    }

    /// Capacity for a worker's inbound job channel. Grounded on fasthttp's
    /// `workerPool`, which uses an unbuffered (capacity `0`) channel when
    /// `GOMAXPROCS == 1` and a capacity-`1` channel otherwise, trading a
    /// rendezvous handoff for one buffered slot on multi-core hosts so the
    /// dispatcher doesn't block on a worker that's a scheduler tick away
    /// from calling `recv` again. Tokio's `mpsc` has no rendezvous
    /// equivalent (`mpsc::channel(0)` panics), so both branches collapse to
    /// `1` here — a deliberate simplification, not a missing case.
    #[inline]
    fn channel_capacity() -> usize {
        1
    }

    /// Hands `job` to an idle worker, reusing the most recently idle one
    /// first, spawning a fresh worker if none are idle and the pool hasn't
    /// hit `max_workers`, or waiting per [`WaitStrategy`] otherwise.
    pub(crate) async fn dispatch(self: &Arc<Self>, mut job: Job) {
        loop {
            if let Some(slot) = self.ready.lock().unwrap().pop() {
                job = match slot.tx.try_send(job) {
                    Ok(()) => return,
                    Err(mpsc::error::TrySendError::Full(job)) => job,
                    Err(mpsc::error::TrySendError::Closed(job)) => job,
                };
                continue;
            }

            if self.workers_started.load(Ordering::Relaxed) < self.max_workers {
                let slot = self.spawn_worker();
                job = match slot.tx.try_send(job) {
                    Ok(()) => return,
                    Err(mpsc::error::TrySendError::Full(job)) => job,
                    Err(mpsc::error::TrySendError::Closed(job)) => job,
                };
                continue;
            }

            match self.limits.0.wait_strategy {
                WaitStrategy::Yield => yield_now().await,
                WaitStrategy::Sleep(time) => tokio_sleep(time).await,
            }
        }
    }

    fn spawn_worker(self: &Arc<Self>) -> Arc<WorkerSlot> {
        let (tx, mut rx) = mpsc::channel::<Job>(Self::channel_capacity());
        let slot = Arc::new(WorkerSlot {
            tx,
            idle_since: Mutex::new(Instant::now()),
        });

        let started = self.workers_started.fetch_add(1, Ordering::Relaxed) + 1;
        self.high_water.fetch_max(started, Ordering::Relaxed);

        let pool = Arc::clone(self);
        let worker_slot = Arc::clone(&slot);
        let mut conn = HttpConnection::new(Arc::clone(&self.handler), self.limits.clone());

        tokio::spawn(async move {
            while let Some((stream, addr, local_addr, ip_guard)) = rx.recv().await {
                let _ = conn.run(stream, addr, local_addr).await;
                drop(ip_guard);

                *worker_slot.idle_since.lock().unwrap() = Instant::now();
                pool.ready.lock().unwrap().push(Arc::clone(&worker_slot));
            }

            pool.workers_started.fetch_sub(1, Ordering::Relaxed);
        });

        slot
    }

    /// Spawns the background task that periodically retires workers idle
    /// past `max_idle`, keeping the pool above roughly 10% of its
    /// high-water mark of concurrently active workers.
    pub(crate) fn spawn_idle_reaper(self: Arc<Self>, max_idle: Duration) {
        tokio::spawn(async move {
            let mut tick = interval(Duration::from_secs(1));
            loop {
                tick.tick().await;
                self.clean(max_idle);
            }
        });
    }

    /// Drops the oldest-idle `Arc<WorkerSlot>`s that have been idle past
    /// `max_idle`, stopping once at most 10% of the high-water mark (or one
    /// worker, whichever is larger) remains. Dropping the last `Arc` drops
    /// its `Sender`, which makes the worker's `recv` return `None` and the
    /// task exit.
    fn clean(&self, max_idle: Duration) {
        let floor = (self.high_water.load(Ordering::Relaxed) / 10).max(1);
        let mut ready = self.ready.lock().unwrap();

        let mut cut = 0;
        while ready.len() - cut > floor {
            match ready.get(cut) {
                Some(slot) if slot.idle_since.lock().unwrap().elapsed() >= max_idle => cut += 1,
                _ => break,
            }
        }

        if cut > 0 {
            ready.drain(0..cut);
        }
    }
}
