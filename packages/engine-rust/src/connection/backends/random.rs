//! Random-record [`Backend`] for demos and soak tests.
//!
//! Every read produces one record with a random string, float, integer,
//! and boolean field. Seedable for reproducible runs.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use datalink_core::{record, Error, Record};

use crate::connection::{Backend, ReadOptions};

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// Backend that synthesizes one random record per read.
pub struct RandomBackend {
    open: AtomicBool,
    rng: Mutex<StdRng>,
}

impl RandomBackend {
    /// Creates a backend with an OS-seeded generator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            open: AtomicBool::new(false),
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Creates a backend with a fixed seed; identical seeds produce
    /// identical record streams.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            open: AtomicBool::new(false),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn next_record(&self) -> Record {
        let mut rng = self.rng.lock();
        let text: String = (0..10)
            .map(|_| char::from(LETTERS[rng.random_range(0..LETTERS.len())]))
            .collect();
        record! {
            "str_" => text,
            "float_" => rng.random::<f64>(),
            "int_" => rng.random_range(0..100_i64),
            "bool_" => rng.random_bool(0.5),
        }
    }
}

impl Default for RandomBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for RandomBackend {
    async fn open(&self) -> Result<(), Error> {
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn read(&self, _key: &str, _options: &ReadOptions) -> Result<Option<Vec<Record>>, Error> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(Error::ConnectionNotOpen);
        }
        Ok(Some(vec![self.next_record()]))
    }

    async fn write(&self, _key: &str, _records: &[Record]) -> Result<(), Error> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(Error::ConnectionNotOpen);
        }
        // Random data has nowhere to go; writes are accepted and dropped.
        Ok(())
    }
}
