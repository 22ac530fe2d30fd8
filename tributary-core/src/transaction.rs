//! Transactions
//!
//! A transaction is one instant of propagation. Every entry point of the
//! engine (constructing an operator, sending a value, sampling a cell) runs
//! inside one, opening it if none is open and joining it otherwise.
//!
//! # How It Works
//!
//! A transaction holds three queues, drained in order when the outermost
//! entry point returns:
//!
//! 1. **Pending** actions, ordered by the rank of the node they belong to and
//!    then by submission sequence. Actions may queue more actions, at any
//!    rank; the drain always picks the lowest one next.
//! 2. **Commit** actions, run once all pending work is done. Cells publish
//!    their new values here, so pending-phase code always sees the value as of
//!    the start of the instant.
//! 3. **Settled** actions, run after the transaction has closed. Listener
//!    callbacks and other external effects go here.
//!
//! # Thread Safety
//!
//! A process-wide re-entrant lock is held for the whole life of a top-level
//! transaction, so only one instant propagates at a time and nested entry
//! points on the same thread join it. The open transaction is recorded per
//! thread: other threads never see it, they wait for the lock instead. Queue
//! bookkeeping sits behind a separate short-lived mutex, and no lock is held
//! while an action runs.

use std::cell::{Cell, RefCell};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use parking_lot::{Mutex, ReentrantMutex};

use crate::error::{Error, Result};
use crate::graph::{with_graph, NodeId, Rank};
use crate::reactive::Listener;

type Action = Box<dyn FnOnce(&Transaction) + Send>;
type Effect = Box<dyn FnOnce() + Send>;
type Hook = Arc<dyn Fn() + Send + Sync>;

/// Submission order of pending actions, shared by all transactions so ties
/// between equal ranks always resolve first-submitted-first-run.
static NEXT_SEQ: AtomicU64 = AtomicU64::new(0);

static TRANSACTION_LOCK: OnceLock<ReentrantMutex<()>> = OnceLock::new();
static START_HOOKS: OnceLock<Mutex<IndexMap<u64, Hook>>> = OnceLock::new();

thread_local! {
    /// Set only on the thread holding the transaction lock.
    static CURRENT: RefCell<Option<Transaction>> = const { RefCell::new(None) };
    static RUNNING_HOOKS: Cell<bool> = const { Cell::new(false) };
}

fn transaction_lock() -> &'static ReentrantMutex<()> {
    TRANSACTION_LOCK.get_or_init(|| ReentrantMutex::new(()))
}

fn set_current(trans: Option<Transaction>) {
    let previous = CURRENT.with(|current| current.replace(trans));
    drop(previous);
}

fn start_hooks() -> &'static Mutex<IndexMap<u64, Hook>> {
    START_HOOKS.get_or_init(|| Mutex::new(IndexMap::new()))
}

/// Number of registered start hooks.
pub(crate) fn start_hook_count() -> usize {
    start_hooks().lock().len()
}

struct Entry {
    node: NodeId,
    action: Action,
}

#[derive(Default)]
struct TransactionState {
    /// Min-heap of `(rank, seq)`. Ranks are captured at submission time.
    queue: BinaryHeap<Reverse<(Rank, u64)>>,

    /// Pending actions by sequence number.
    entries: IndexMap<u64, Entry>,

    /// Set when a link changed ranks while actions were queued.
    regen: bool,

    commit: Vec<Action>,
    settled: Vec<Effect>,

    /// Per-instant scratch state to clear once the instant is over, whether
    /// it completed or unwound.
    resets: Vec<Effect>,

    /// Bound flags of the loops created in this transaction.
    loops: Vec<Arc<AtomicBool>>,
}

impl TransactionState {
    fn pop(&mut self) -> Option<Entry> {
        while let Some(Reverse((_, seq))) = self.queue.pop() {
            if let Some(entry) = self.entries.swap_remove(&seq) {
                return Some(entry);
            }
        }
        None
    }
}

/// Handle to an open transaction.
///
/// Handles are cheap to clone. Engine internals take a `&Transaction`
/// explicitly; user code normally only sees one inside [`Transaction::run`].
#[derive(Clone)]
pub struct Transaction {
    id: u64,
    state: Arc<Mutex<TransactionState>>,
}

impl Transaction {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let id = COUNTER.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(transaction = id, "transaction opened");
        Self {
            id,
            state: Arc::new(Mutex::new(TransactionState::default())),
        }
    }

    /// Run `f` inside the current transaction, opening one first if none is
    /// open. The transaction closes when the call that opened it returns.
    ///
    /// # Panics
    ///
    /// Panics if the transaction this call opened closes with a usage error
    /// (see [`try_run`](Self::try_run)). Panics raised by user callbacks
    /// during propagation unwind through this call.
    pub fn run<R>(f: impl FnOnce(&Transaction) -> R) -> R {
        match Self::try_run(f) {
            Ok(result) => result,
            Err(err) => panic!("{err}"),
        }
    }

    /// Like [`run`](Self::run), but reports usage errors detected when the
    /// transaction closes, such as a loop that was never bound.
    pub fn try_run<R>(f: impl FnOnce(&Transaction) -> R) -> Result<R> {
        let _lock = transaction_lock().lock();

        if let Some(trans) = Self::current() {
            return Ok(f(&trans));
        }

        run_start_hooks();

        let trans = Transaction::new();
        let mut open = OpenTransaction::install(trans.clone());

        let result = f(&trans);
        let outcome = trans.propagate();

        open.completed = true;
        drop(open);

        trans.settle();
        outcome.map(|()| result)
    }

    /// The transaction open on this thread's call chain, if any.
    pub fn current() -> Option<Transaction> {
        CURRENT.with(|current| current.borrow().clone())
    }

    /// Register a hook run whenever a new top-level transaction opens.
    ///
    /// Hooks may open transactions of their own; that does not run the
    /// hooks again. The hook stays registered until the returned
    /// [`Listener`] is unregistered or dropped.
    pub fn on_start(hook: impl Fn() + Send + Sync + 'static) -> Listener {
        static NEXT_HOOK: AtomicU64 = AtomicU64::new(0);
        let key = NEXT_HOOK.fetch_add(1, Ordering::Relaxed);

        let _lock = transaction_lock().lock();
        start_hooks().lock().insert(key, Arc::new(hook));

        Listener::new(move || {
            // Serialized with transaction opening, so a hook never runs after
            // its removal returns.
            let _lock = transaction_lock().lock();
            let removed = start_hooks().lock().shift_remove(&key);
            drop(removed);
        })
    }

    /// Unique ID of this transaction, for diagnostics.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue `action` to run during the pending phase, ordered by the rank of
    /// `node`, then by submission order.
    pub fn schedule(&self, node: NodeId, action: impl FnOnce(&Transaction) + Send + 'static) {
        let rank = with_graph(|graph| graph.rank(node)).unwrap_or(0);
        let seq = NEXT_SEQ.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.lock();
        state.queue.push(Reverse((rank, seq)));
        state.entries.insert(
            seq,
            Entry {
                node,
                action: Box::new(action),
            },
        );
    }

    /// Queue `action` to run in the commit phase, after all pending work.
    pub fn on_commit(&self, action: impl FnOnce(&Transaction) + Send + 'static) {
        self.state.lock().commit.push(Box::new(action));
    }

    /// Queue `action` to run once the transaction has closed and all values
    /// are committed.
    pub fn on_settled(&self, action: impl FnOnce() + Send + 'static) {
        self.state.lock().settled.push(Box::new(action));
    }

    /// Queue a reset of per-instant scratch state. Resets run at the end of
    /// the commit phase, or when the instant unwinds.
    pub(crate) fn on_reset(&self, reset: impl FnOnce() + Send + 'static) {
        self.state.lock().resets.push(Box::new(reset));
    }

    /// Ranks changed while work may be queued; re-order before the next pop.
    pub(crate) fn request_regen(&self) {
        self.state.lock().regen = true;
    }

    /// Require `bound` to be set by the time this transaction closes.
    pub(crate) fn expect_bound(&self, bound: Arc<AtomicBool>) {
        self.state.lock().loops.push(bound);
    }

    fn regenerate(&self) {
        let pending: Vec<(u64, NodeId)> = self
            .state
            .lock()
            .entries
            .iter()
            .map(|(seq, entry)| (*seq, entry.node))
            .collect();

        let keys: BinaryHeap<Reverse<(Rank, u64)>> = with_graph(|graph| {
            pending
                .iter()
                .map(|(seq, node)| Reverse((graph.rank(*node).unwrap_or(0), *seq)))
                .collect()
        });

        self.state.lock().queue = keys;
    }

    /// Drain the pending queue, then the commit queue.
    fn propagate(&self) -> Result<()> {
        let mut fired = 0usize;
        loop {
            let regen = std::mem::take(&mut self.state.lock().regen);
            if regen {
                self.regenerate();
            }

            let next = self.state.lock().pop();
            match next {
                Some(entry) => {
                    (entry.action)(self);
                    fired += 1;
                }
                None => break,
            }
        }

        // Pending actions may create loops too, so check once they are done.
        let loops = std::mem::take(&mut self.state.lock().loops);
        let outcome = if loops.iter().all(|bound| bound.load(Ordering::Acquire)) {
            Ok(())
        } else {
            tracing::warn!(transaction = self.id, "transaction closing with an unbound loop");
            Err(Error::LoopNeverBound)
        };

        let mut committed = 0usize;
        loop {
            let batch = std::mem::take(&mut self.state.lock().commit);
            if batch.is_empty() {
                break;
            }
            committed += batch.len();
            for action in batch {
                action(self);
            }
        }

        self.run_resets();

        tracing::trace!(transaction = self.id, fired, committed, "transaction propagated");
        outcome
    }

    fn settle(&self) {
        loop {
            let batch = std::mem::take(&mut self.state.lock().settled);
            if batch.is_empty() {
                break;
            }
            for action in batch {
                action();
            }
        }
        tracing::trace!(transaction = self.id, "transaction settled");
    }

    fn run_resets(&self) {
        let resets = std::mem::take(&mut self.state.lock().resets);
        for reset in resets {
            reset();
        }
    }

    /// Throw away all queued work after an unwind.
    fn abort(&self) {
        let discarded = {
            let mut state = self.state.lock();
            state.queue.clear();
            (
                std::mem::take(&mut state.entries),
                std::mem::take(&mut state.commit),
                std::mem::take(&mut state.settled),
            )
        };
        drop(discarded);
        self.run_resets();
        tracing::warn!(transaction = self.id, "transaction aborted");
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("pending", &state.entries.len())
            .field("commit", &state.commit.len())
            .field("settled", &state.settled.len())
            .finish()
    }
}

/// Installs a transaction as current and uninstalls it when dropped, so the
/// engine is usable again even if the transaction body panics.
struct OpenTransaction {
    trans: Transaction,
    completed: bool,
}

impl OpenTransaction {
    fn install(trans: Transaction) -> Self {
        set_current(Some(trans.clone()));
        Self {
            trans,
            completed: false,
        }
    }
}

impl Drop for OpenTransaction {
    fn drop(&mut self) {
        set_current(None);
        if !self.completed {
            self.trans.abort();
        }
    }
}

fn run_start_hooks() {
    if RUNNING_HOOKS.with(Cell::get) {
        return;
    }

    let hooks: Vec<Hook> = start_hooks().lock().values().cloned().collect();
    if hooks.is_empty() {
        return;
    }

    struct Running;
    impl Drop for Running {
        fn drop(&mut self) {
            RUNNING_HOOKS.with(|running| running.set(false));
        }
    }

    RUNNING_HOOKS.with(|running| running.set(true));
    let _running = Running;
    for hook in hooks {
        hook();
    }
}
