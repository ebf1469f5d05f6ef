//! Typed, directional, bounded links between stages.
//!
//! A [`Link`] is a cheap handle: clones refer to the same link (same id, same
//! view). Each link points at a shared [`BufferCell`]. Linking a receive link
//! to a send link makes both point at the same cell, so after linking there
//! is exactly one queue per connected group of links, no matter how many
//! views exist.
//!
//! The queue itself is a crossbeam bounded channel, allocated lazily by
//! [`Link::make`] during compilation. Until then, sends fail with
//! [`PipelineError::Unallocated`].
//!
//! # Closing
//!
//! Every open send view sharing a cell counts as one writer. When the last
//! writer closes, the cell drops its sender: receivers drain what is left
//! and then observe end-of-stream.

use crate::error::{PipelineError, Result};
use crate::pipeline::cancel::CancellationToken;
use crate::pipeline::id::LinkId;
use crossbeam_channel::{bounded, select, Receiver, Sender};
use serde::Serialize;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

/// Whether a link writes into or reads from its buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    Send,
    Receive,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Send => write!(f, "send"),
            Direction::Receive => write!(f, "receive"),
        }
    }
}

/// The allocated queue behind a cell.
struct Buffer<T> {
    /// `None` once every writer has closed.
    tx: RwLock<Option<Sender<T>>>,
    rx: Receiver<T>,
    capacity: usize,
}

/// Shared slot holding a lazily allocated buffer.
struct BufferCell<T> {
    buffer: OnceLock<Buffer<T>>,
    /// Open send views pointing at this cell.
    writers: AtomicUsize,
}

impl<T> BufferCell<T> {
    fn new(writers: usize) -> Arc<Self> {
        Arc::new(Self {
            buffer: OnceLock::new(),
            writers: AtomicUsize::new(writers),
        })
    }

    fn make(&self, capacity: usize) {
        self.buffer.get_or_init(|| {
            let (tx, rx) = bounded(capacity);
            // Every writer may have closed before allocation.
            let tx = (self.writers.load(Ordering::SeqCst) > 0).then_some(tx);
            Buffer {
                tx: RwLock::new(tx),
                rx,
                capacity,
            }
        });
    }

    fn release_writer(&self) {
        if self.writers.fetch_sub(1, Ordering::SeqCst) == 1 {
            if let Some(buffer) = self.buffer.get() {
                buffer
                    .tx
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
            }
        }
    }

    fn sender(&self) -> Option<Sender<T>> {
        self.buffer.get().and_then(|b| {
            b.tx.read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        })
    }

    fn is_closed(&self) -> bool {
        match self.buffer.get() {
            Some(b) => b.tx.read().unwrap_or_else(PoisonError::into_inner).is_none(),
            None => self.writers.load(Ordering::SeqCst) == 0,
        }
    }
}

struct LinkInner<T> {
    id: LinkId,
    direction: Direction,
    cell: RwLock<Arc<BufferCell<T>>>,
    closed: AtomicBool,
}

/// A typed, directional view over a bounded queue.
pub struct Link<T> {
    inner: Arc<LinkInner<T>>,
}

impl<T> Clone for Link<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> Link<T> {
    fn with_direction(direction: Direction) -> Self {
        let writers = match direction {
            Direction::Send => 1,
            Direction::Receive => 0,
        };
        Self {
            inner: Arc::new(LinkInner {
                id: LinkId::next(),
                direction,
                cell: RwLock::new(BufferCell::new(writers)),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Create an output link.
    pub fn sender() -> Self {
        Self::with_direction(Direction::Send)
    }

    /// Create an input link.
    pub fn receiver() -> Self {
        Self::with_direction(Direction::Receive)
    }

    pub fn id(&self) -> LinkId {
        self.inner.id
    }

    pub fn direction(&self) -> Direction {
        self.inner.direction
    }

    /// Name of the payload type, for diagnostics.
    pub fn payload_type(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn cell(&self) -> Arc<BufferCell<T>> {
        self.inner
            .cell
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn expect_direction(&self, expected: Direction) -> Result<()> {
        if self.inner.direction == expected {
            Ok(())
        } else {
            Err(PipelineError::Direction {
                link: self.inner.id,
                expected,
                actual: self.inner.direction,
            })
        }
    }

    /// Allocate the buffer with room for `capacity` values.
    ///
    /// Only the first call on a shared buffer allocates; later calls, through
    /// this view or any aliased one, are no-ops.
    pub fn make(&self, capacity: usize) {
        self.cell().make(capacity);
    }

    pub fn is_allocated(&self) -> bool {
        self.cell().buffer.get().is_some()
    }

    /// Capacity of the allocated buffer, if any.
    pub fn capacity(&self) -> Option<usize> {
        self.cell().buffer.get().map(|b| b.capacity)
    }

    /// Number of values currently queued.
    pub fn len(&self) -> usize {
        self.cell().buffer.get().map_or(0, |b| b.rx.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn open_sender(&self) -> Result<Sender<T>> {
        self.expect_direction(Direction::Send)?;
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(PipelineError::Closed(self.inner.id));
        }
        let cell = self.cell();
        if cell.buffer.get().is_none() {
            return Err(PipelineError::Unallocated(self.inner.id));
        }
        cell.sender().ok_or(PipelineError::Closed(self.inner.id))
    }

    /// Enqueue a value, blocking while the buffer is full.
    pub fn send(&self, value: T) -> Result<()> {
        let tx = self.open_sender()?;
        tx.send(value)
            .map_err(|_| PipelineError::Closed(self.inner.id))
    }

    /// Enqueue every value in order, blocking while the buffer is full.
    pub fn send_all<I>(&self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
    {
        let tx = self.open_sender()?;
        for value in values {
            tx.send(value)
                .map_err(|_| PipelineError::Closed(self.inner.id))?;
        }
        Ok(())
    }

    /// Enqueue a value unless `token` is cancelled first.
    ///
    /// Producers should prefer this over [`Link::send`] inside a stage, so a
    /// full buffer never keeps them from observing cancellation.
    pub fn send_or_cancel(&self, value: T, token: &CancellationToken) -> Result<()> {
        if token.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let tx = self.open_sender()?;
        select! {
            send(tx, value) -> res => res.map_err(|_| PipelineError::Closed(self.inner.id)),
            recv(token.cancelled()) -> _ => Err(PipelineError::Cancelled),
        }
    }

    /// Dequeue one value.
    ///
    /// Returns `None` right away if `token` is already cancelled. Otherwise
    /// blocks until a value arrives, the token is cancelled, or every writer
    /// has closed and the queue is drained.
    pub fn receive(&self, token: &CancellationToken) -> Option<T> {
        if token.is_cancelled() {
            return None;
        }
        let cell = self.cell();
        let buffer = self.readable(&cell)?;
        select! {
            recv(buffer.rx) -> msg => msg.ok(),
            recv(token.cancelled()) -> _ => None,
        }
    }

    /// Dequeue one value without blocking.
    pub fn try_receive(&self) -> Option<T> {
        let cell = self.cell();
        let buffer = self.readable(&cell)?;
        buffer.rx.try_recv().ok()
    }

    /// Iterate over received values until cancellation or end-of-stream.
    pub fn iter<'a>(&'a self, token: &'a CancellationToken) -> impl Iterator<Item = T> + 'a {
        std::iter::from_fn(move || self.receive(token))
    }

    fn readable<'c>(&self, cell: &'c BufferCell<T>) -> Option<&'c Buffer<T>> {
        if self.inner.direction != Direction::Receive {
            tracing::error!("Receive called on send link {}", self.inner.id);
            return None;
        }
        let buffer = cell.buffer.get();
        if buffer.is_none() {
            tracing::error!(
                "Receive called on link {} before its buffer was allocated",
                self.inner.id
            );
        }
        buffer
    }

    /// Clone of the underlying queue receiver.
    pub(crate) fn raw_receiver(&self) -> Result<Receiver<T>> {
        self.expect_direction(Direction::Receive)?;
        self.cell()
            .buffer
            .get()
            .map(|b| b.rx.clone())
            .ok_or(PipelineError::Unallocated(self.inner.id))
    }

    /// Close this send view. Once every send view sharing the buffer is
    /// closed, receivers see end-of-stream after draining. Idempotent; a
    /// no-op on receive links.
    pub fn close(&self) {
        if self.inner.direction != Direction::Send {
            return;
        }
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.cell().release_writer();
        }
    }

    /// For a send link, whether this view was closed. For a receive link,
    /// whether every writer of the shared buffer has closed.
    pub fn is_closed(&self) -> bool {
        match self.inner.direction {
            Direction::Send => self.inner.closed.load(Ordering::SeqCst),
            Direction::Receive => self.cell().is_closed(),
        }
    }

    /// Make this link a view over `other`'s buffer.
    pub fn receive_from(&self, other: &dyn AnyLink) -> Result<()> {
        let Some(other_link) = other.as_any().downcast_ref::<Link<T>>() else {
            return Err(PipelineError::TypeMismatch {
                from: other.id(),
                to: self.inner.id,
                expected: self.payload_type(),
                found: other.payload_type(),
            });
        };
        self.adopt(other_link.cell());
        Ok(())
    }

    fn adopt(&self, cell: Arc<BufferCell<T>>) {
        let mut slot = self
            .inner
            .cell
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if Arc::ptr_eq(&*slot, &cell) {
            return;
        }
        if self.inner.direction == Direction::Send && !self.inner.closed.load(Ordering::SeqCst) {
            cell.writers.fetch_add(1, Ordering::SeqCst);
            slot.writers.fetch_sub(1, Ordering::SeqCst);
        }
        *slot = cell;
    }

    /// Whether both links are views over the same buffer.
    pub fn shares_buffer_with(&self, other: &dyn AnyLink) -> bool {
        other
            .as_any()
            .downcast_ref::<Link<T>>()
            .is_some_and(|o| Arc::ptr_eq(&self.cell(), &o.cell()))
    }

    /// Type-erased handle to this link, as returned from [`Stage::links`].
    ///
    /// [`Stage::links`]: crate::pipeline::stage::Stage::links
    pub fn erased(&self) -> Box<dyn AnyLink> {
        Box::new(self.clone())
    }
}

impl<T: Send + 'static> fmt::Debug for Link<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("id", &self.inner.id)
            .field("direction", &self.inner.direction)
            .field("payload", &self.payload_type())
            .field("allocated", &self.is_allocated())
            .finish()
    }
}

/// Object-safe view of a [`Link`] with its payload type erased.
///
/// The builder and compiler only ever deal with links through this trait.
pub trait AnyLink: Send + Sync {
    fn id(&self) -> LinkId;
    fn direction(&self) -> Direction;
    fn payload_type(&self) -> &'static str;
    fn payload_type_id(&self) -> TypeId;
    fn make(&self, capacity: usize);
    fn is_allocated(&self) -> bool;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn close(&self);
    fn receive_from(&self, other: &dyn AnyLink) -> Result<()>;
    fn shares_buffer_with(&self, other: &dyn AnyLink) -> bool;
    fn clone_box(&self) -> Box<dyn AnyLink>;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Send + 'static> AnyLink for Link<T> {
    fn id(&self) -> LinkId {
        Link::id(self)
    }

    fn direction(&self) -> Direction {
        Link::direction(self)
    }

    fn payload_type(&self) -> &'static str {
        Link::payload_type(self)
    }

    fn payload_type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn make(&self, capacity: usize) {
        Link::make(self, capacity)
    }

    fn is_allocated(&self) -> bool {
        Link::is_allocated(self)
    }

    fn len(&self) -> usize {
        Link::len(self)
    }

    fn close(&self) {
        Link::close(self)
    }

    fn receive_from(&self, other: &dyn AnyLink) -> Result<()> {
        Link::receive_from(self, other)
    }

    fn shares_buffer_with(&self, other: &dyn AnyLink) -> bool {
        Link::shares_buffer_with(self, other)
    }

    fn clone_box(&self) -> Box<dyn AnyLink> {
        self.erased()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
