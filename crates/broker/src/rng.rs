//! shared randomness for the whole broker
//!
//! All multipath, fading, jitter and drop draws come out of one `StdRng`
//! behind a mutex. Seed it (via `ETHERWAVE_SEED`) and a run becomes
//! replayable; leave it unseeded and it boots from OS entropy.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::SeedableRng;

pub struct SharedRng {
    inner: Mutex<StdRng>,
}

impl SharedRng {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self { inner: Mutex::new(rng) }
    }

    /// Run `f` with exclusive access to the RNG. Keep the closure free of
    /// await points; the lock is synchronous on purpose.
    pub fn with<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut guard = self.inner.lock().expect("rng lock poisoned");
        f(&mut guard)
    }
}
