use std::{
    fmt,
    sync::{
        LazyLock, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};
use ulid::Ulid;
use xxhash_rust::xxh3::xxh3_128;

///
/// GENERATOR is lazily initiated with a Mutex
/// it has to keep state so run ids stay monotonic within one process
///

static GENERATOR: LazyLock<Mutex<Generator>> = LazyLock::new(|| Mutex::new(Generator::default()));

static SEED_COUNTER: AtomicU64 = AtomicU64::new(0);

///
/// RunId
///
/// Identifier of one controller run; suffixes the checkpoint relation name
/// so concurrent runs never share transient storage.
///

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RunId(Ulid);

impl RunId {
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Lowercase encoding, safe to embed in relation identifiers.
    #[must_use]
    pub fn to_identifier(self) -> String {
        self.0.to_string().to_ascii_lowercase()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Generate a run id using the global monotonic generator.
#[must_use]
pub fn generate_run_id() -> RunId {
    // A poisoned generator still holds a valid previous id.
    let mut generator = GENERATOR
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);

    RunId(generator.generate())
}

///
/// Generator
///
/// Monotonic ULID source; increments within the same millisecond and
/// reseeds from xxh3 mixing of clock, process id, and a counter otherwise.
///

struct Generator {
    previous: Ulid,
}

impl Default for Generator {
    fn default() -> Self {
        Self {
            previous: Ulid::nil(),
        }
    }
}

impl Generator {
    fn generate(&mut self) -> Ulid {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let ts = u64::try_from(now.as_millis()).unwrap_or(u64::MAX);
        let last_ts = self.previous.timestamp_ms();

        // maybe time went backward, or it is the same ms.
        // increment instead of reseeding so that it stays monotonic
        let ulid = if ts <= last_ts {
            match self.previous.increment() {
                Some(next) => next,
                // random bits exhausted: move to the next millisecond
                None => Ulid::from_parts(last_ts + 1, seed(now.subsec_nanos())),
            }
        } else {
            Ulid::from_parts(ts, seed(now.subsec_nanos()))
        };
        self.previous = ulid;

        ulid
    }
}

fn seed(nanos: u32) -> u128 {
    let counter = SEED_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut material = [0u8; 16];
    material[..4].copy_from_slice(&nanos.to_le_bytes());
    material[4..8].copy_from_slice(&std::process::id().to_le_bytes());
    material[8..].copy_from_slice(&counter.to_le_bytes());

    xxh3_128(&material)
}

///
/// TESTS
///
