//! Supersession of in-flight queries.
//!
//! Each new query for the same view advances a shared counter; a ticket
//! from an older generation fails its next check and the pipeline drops
//! whatever it has fetched so far.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::ReportError;

#[derive(Debug, Clone, Default)]
pub struct QueryGeneration {
    current: Arc<AtomicU64>,
}

impl QueryGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new generation, invalidating every ticket issued before.
    pub fn advance(&self) -> QueryTicket {
        let generation = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        QueryTicket {
            generation,
            current: Arc::clone(&self.current),
        }
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct QueryTicket {
    generation: u64,
    current: Arc<AtomicU64>,
}

impl QueryTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.generation
    }

    pub fn ensure_current(&self) -> Result<(), ReportError> {
        let current = self.current.load(Ordering::SeqCst);
        if current == self.generation {
            Ok(())
        } else {
            Err(ReportError::Superseded {
                generation: self.generation,
                current,
            })
        }
    }
}

/// Views remembered by a default [`GenerationRegistry`].
pub const DEFAULT_CAPACITY: usize = 1024;
/// Views untouched for this long are forgotten first.
pub const DEFAULT_IDLE: Duration = Duration::from_secs(15 * 60);

#[derive(Debug)]
struct ViewEntry {
    generation: QueryGeneration,
    last_used: Instant,
}

/// One [`QueryGeneration`] per view key, bounded in size.
///
/// When full, idle views are dropped first and then the least recently used
/// one. A dropped view's in-flight ticket simply stays current.
#[derive(Debug)]
pub struct GenerationRegistry {
    views: Mutex<HashMap<String, ViewEntry>>,
    capacity: usize,
    idle: Duration,
}

impl Default for GenerationRegistry {
    fn default() -> Self {
        GenerationRegistry::new(DEFAULT_CAPACITY, DEFAULT_IDLE)
    }
}

impl GenerationRegistry {
    pub fn new(capacity: usize, idle: Duration) -> Self {
        GenerationRegistry {
            views: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            idle,
        }
    }

    /// Starts a new generation for `key`, superseding its previous query.
    pub fn begin(&self, key: &str) -> QueryTicket {
        self.begin_at(key, Instant::now())
    }

    pub fn begin_at(&self, key: &str, now: Instant) -> QueryTicket {
        let mut views = self
            .views
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if !views.contains_key(key) && views.len() >= self.capacity {
            views.retain(|_, view| now.saturating_duration_since(view.last_used) < self.idle);
            if views.len() >= self.capacity {
                let oldest = views
                    .iter()
                    .min_by_key(|(_, view)| view.last_used)
                    .map(|(key, _)| key.clone());
                if let Some(oldest) = oldest {
                    views.remove(&oldest);
                }
            }
        }

        let view = views.entry(key.to_string()).or_insert_with(|| ViewEntry {
            generation: QueryGeneration::new(),
            last_used: now,
        });
        view.last_used = now;
        view.generation.advance()
    }

    pub fn len(&self) -> usize {
        self.views
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
