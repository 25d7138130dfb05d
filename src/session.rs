use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

use crate::captioner::CaptionedImage;

/// One batch of captioned images plus the viewer's position in it.
///
/// The index always points at an entry unless the session is empty.
#[derive(Debug, Default, Clone)]
pub struct Session {
    images: Vec<CaptionedImage>,
    index: usize,
}

impl Session {
    pub fn new(images: Vec<CaptionedImage>) -> Self {
        Self { images, index: 0 }
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn get(&self, index: usize) -> Option<&CaptionedImage> {
        self.images.get(index)
    }

    pub fn current(&self) -> Option<&CaptionedImage> {
        self.images.get(self.index)
    }

    /// "Image i/N" for the current position, or `None` when empty.
    pub fn status(&self) -> Option<String> {
        (!self.is_empty()).then(|| format!("Image {}/{}", self.index + 1, self.len()))
    }

    /// Steps back one entry. Returns `None` without moving at the first entry.
    pub fn previous(&mut self) -> Option<&CaptionedImage> {
        if self.is_empty() || self.index == 0 {
            return None;
        }
        self.index -= 1;
        self.current()
    }

    /// Steps forward one entry. Returns `None` without moving at the last entry.
    pub fn next(&mut self) -> Option<&CaptionedImage> {
        if self.index + 1 >= self.len() {
            return None;
        }
        self.index += 1;
        self.current()
    }

    pub fn step(&mut self, direction: Direction) -> Option<&CaptionedImage> {
        match direction {
            Direction::Previous => self.previous(),
            Direction::Next => self.next(),
        }
    }
}

/// Which way a navigation request moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Previous,
    Next,
}

pub const DEFAULT_CAPACITY: usize = 64;

/// Identifies one submission's batch: the session plus its generation.
///
/// The generation changes on every reset, so URLs built from a handle never
/// point at an earlier batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionHandle {
    pub id: Uuid,
    pub generation: u64,
}

#[derive(Debug)]
struct Entry {
    session: Session,
    generation: u64,
    last_used: u64,
}

#[derive(Debug, Default)]
struct Slots {
    entries: HashMap<Uuid, Entry>,
    clock: u64,
}

impl Slots {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Drops least recently used entries until one more fits under `capacity`.
    fn make_room(&mut self, capacity: usize) {
        while self.entries.len() >= capacity {
            let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(id, _)| *id)
            else {
                break;
            };
            self.entries.remove(&oldest);
            tracing::debug!(session = %oldest, "evicted least recently used session");
        }
    }
}

/// In-memory sessions keyed by id, bounded by a least-recently-used cap.
/// Lost on restart.
#[derive(Debug)]
pub struct SessionStore {
    slots: Mutex<Slots>,
    capacity: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl SessionStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(Slots::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Empties the session under `id`, or opens a new one when `id` is absent
    /// or unknown, and starts a new generation for it.
    pub fn reset(&self, id: Option<Uuid>) -> SessionHandle {
        let mut slots = self.lock();
        let generation = slots.tick();
        let id = match id {
            Some(id) if slots.entries.contains_key(&id) => id,
            _ => {
                slots.make_room(self.capacity);
                Uuid::new_v4()
            }
        };
        slots.entries.insert(
            id,
            Entry {
                session: Session::default(),
                generation,
                last_used: generation,
            },
        );
        handle(id, generation)
    }

    /// Stores the finished batch for `handle`.
    ///
    /// Returns false, dropping `session`, when a later reset has already
    /// claimed the id.
    pub fn fill(&self, handle: SessionHandle, session: Session) -> bool {
        let mut slots = self.lock();
        let last_used = slots.tick();
        match slots.entries.get_mut(&handle.id) {
            Some(entry) if entry.generation != handle.generation => false,
            Some(entry) => {
                entry.session = session;
                entry.last_used = last_used;
                true
            }
            None => {
                slots.make_room(self.capacity);
                slots.entries.insert(
                    handle.id,
                    Entry {
                        session,
                        generation: handle.generation,
                        last_used,
                    },
                );
                true
            }
        }
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.lock().entries.contains_key(id)
    }

    /// Runs `f` against the session under `id`, if any, marking it as used.
    pub fn with_session<T>(
        &self,
        id: &Uuid,
        f: impl FnOnce(&mut Session, SessionHandle) -> T,
    ) -> Option<T> {
        let mut slots = self.lock();
        let now = slots.tick();
        let entry = slots.entries.get_mut(id)?;
        entry.last_used = now;
        Some(f(&mut entry.session, handle(*id, entry.generation)))
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slots> {
        // A panic while holding the lock cannot leave a session half-written.
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn handle(id: Uuid, generation: u64) -> SessionHandle {
    SessionHandle { id, generation }
}
