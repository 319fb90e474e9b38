use std::fmt;
use std::future;
use std::pin;
use std::sync;
use std::task;
use std::vec;

use crate::util;

/// Something that can be applied to a versioned object, producing a record of what it did.
pub trait Change<Object>: Clone {
    type ApplyError;
    type ApplyRecord: Clone;

    fn apply(self, object: &mut Object) -> Result<(Self, Self::ApplyRecord), Self::ApplyError>;
}

#[derive(Clone)]
pub struct Version<Object: Versioned> {
    previous: Option<(sync::Arc<Object>, <Object::Change as Change<Object>>::ApplyRecord)>,
    uid: u64,
    generation: u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryError {
    /// The two objects don't share a lineage.
    Unrelated,

    /// The supposedly older object isn't in the newer one's history.
    NotAnAncestor,
}

impl<Object: Versioned> fmt::Debug for Version<Object> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Version")
            .field("uid", &self.uid)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl<T: Versioned> Default for Version<T> {
    fn default() -> Self {
        Version {
            previous: None,
            uid: next_uid(),
            generation: next_generation(),
        }
    }
}

pub trait Versioned: Sized + Clone {
    type Change: Change<Self>;

    fn version(&self) -> &Version<Self>;
    fn version_mut(&mut self) -> &mut Version<Self>;

    fn generation(&self) -> u64 {
        self.version().generation
    }

    fn previous(&self) -> Option<&(sync::Arc<Self>, <Self::Change as Change<Self>>::ApplyRecord)> {
        self.version().previous.as_ref()
    }

    fn is_outdated(&self, other: &Self) -> bool {
        self.version().uid != other.version().uid ||
            self.generation() != other.generation()
    }

    /// Applies a change without going through a [Host]. The old version is still kept as history.
    fn change_in_place(&mut self, change: Self::Change) -> Result<<Self::Change as Change<Self>>::ApplyRecord, <Self::Change as Change<Self>>::ApplyError> {
        let old = sync::Arc::new(self.clone());
        let (_change, record) = change.apply(self)?;

        let version = self.version_mut();
        version.previous = Some((old, record.clone()));
        version.generation = next_generation();

        Ok(record)
    }

    /// Invokes the callback with every (version, record) pair between `old` and `self`, oldest first.
    fn changes_since<F>(&self, old: &Self, cb: &mut F) -> Result<(), HistoryError>
    where F: FnMut(&Self, &<Self::Change as Change<Self>>::ApplyRecord) {
        if self.version().uid != old.version().uid {
            return Err(HistoryError::Unrelated);
        }

        let mut chain = vec::Vec::new();
        let mut current = self;

        while current.generation() != old.generation() {
            match current.previous() {
                Some((previous, record)) => {
                    chain.push((current, record));
                    current = &**previous;
                },
                None => return Err(HistoryError::NotAnAncestor),
            }
        }

        for (object, record) in chain.into_iter().rev() {
            cb(object, record);
        }

        Ok(())
    }
}

static NEXT_UID:        sync::atomic::AtomicU64 = sync::atomic::AtomicU64::new(1);
static NEXT_GENERATION: sync::atomic::AtomicU64 = sync::atomic::AtomicU64::new(1);

fn next_uid() -> u64 {
    NEXT_UID.fetch_add(1, sync::atomic::Ordering::Relaxed)
}

fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, sync::atomic::Ordering::Relaxed)
}

/// Shares a versioned object between threads. Readers get immutable snapshots and never block; writers are
/// serialized and publish a whole new version at once.
///
/// Every published version links to the one before it, so the chain walked by [Versioned::changes_since] grows by
/// one version per change and is only freed once nothing holds the older snapshots. Long-running hosts should call
/// [Host::forget_history] once their readers have caught up.
pub struct Host<Object: Versioned> {
    notifier: util::Notifier,
    current: arc_swap::ArcSwap<Object>,
    writer: parking_lot::Mutex<()>,
}

impl<Object: Versioned> Host<Object> {
    pub fn new(initial: Object) -> Self {
        Host {
            notifier: util::Notifier::new(),
            current: arc_swap::ArcSwap::from(sync::Arc::new(initial)),
            writer: parking_lot::Mutex::new(()),
        }
    }

    pub fn enroll(&self, cx: &task::Context) {
        self.notifier.enroll(cx);
    }

    pub fn wait_for_update<'a>(&'a self, current: &'_ Object) -> ObjectUpdateFuture<'a, Object> {
        ObjectUpdateFuture {
            host: self,
            generation: current.generation(),
        }
    }

    pub fn borrow(&self) -> arc_swap::Guard<sync::Arc<Object>> {
        self.current.load()
    }

    pub fn get(&self) -> sync::Arc<Object> {
        self.current.load_full()
    }

    /// Applies the change to a private copy of the current version and publishes it. Concurrent readers see either
    /// the old version or the new one, never anything in between. On error, nothing is published.
    pub fn change(&self, change: Object::Change) -> Result<sync::Arc<Object>, <<Object as Versioned>::Change as Change<Object>>::ApplyError> {
        let _writer = self.writer.lock();

        let old = self.current.load_full();
        let mut object = (*old).clone();
        let (_change, record) = change.apply(&mut object)?;

        let version = object.version_mut();
        version.previous = Some((old, record));
        version.generation = next_generation();

        let new = sync::Arc::new(object);
        self.current.store(new.clone());

        self.notifier.notify();
        Ok(new)
    }

    /// Republishes the current version without its history. The generation is unchanged, so waiters aren't woken,
    /// but [Versioned::changes_since] from any snapshot older than this one fails with
    /// [HistoryError::NotAnAncestor] afterwards. Snapshots already handed out keep their own history.
    pub fn forget_history(&self) -> sync::Arc<Object> {
        let _writer = self.writer.lock();

        let mut object = (*self.current.load_full()).clone();
        object.version_mut().previous = None;

        let new = sync::Arc::new(object);
        self.current.store(new.clone());
        new
    }
}

pub struct ObjectUpdateFuture<'a, Object: Versioned> {
    host: &'a Host<Object>,
    generation: u64,
}

impl<'a, Object: Versioned> future::Future for ObjectUpdateFuture<'a, Object> {
    type Output = sync::Arc<Object>;

    fn poll(self: pin::Pin<&mut Self>, cx: &mut task::Context<'_>) -> task::Poll<Self::Output> {
        let guard = self.host.current.load();
        if guard.generation() != self.generation {
            /* already have a newer version */
            task::Poll::Ready(arc_swap::Guard::into_inner(guard))
        } else {
            /* have to wait, so enroll with the notifier before looking again */
            std::mem::drop(guard);
            self.host.enroll(cx);

            /* a writer may have published between our first load and enrolling */
            let guard = self.host.current.load();
            if guard.generation() != self.generation {
                task::Poll::Ready(arc_swap::Guard::into_inner(guard))
            } else {
                /* the next publish wakes us */
                task::Poll::Pending
            }
        }
    }
}

impl<Object: Versioned> fmt::Debug for Host<Object> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(std::any::type_name::<Host<Object>>())
            .field("generation", &self.borrow().generation())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for HistoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryError::Unrelated => write!(f, "Versions belong to different objects"),
            HistoryError::NotAnAncestor => write!(f, "Version is not in this object's history"),
        }
    }
}

impl std::error::Error for HistoryError {
}
