//! Minibatch streams over an [`ImageDb`].
//!
//! * **[`TrainStream`]**: infinite, reshuffled every pass, optionally
//!   stratified, randomly shifted and flipped. Never runs dry.
//! * **[`EvalStream`]**: one finite deterministic pass with center crops;
//!   [`DataStream::reset`] rewinds it.

use std::collections::BTreeMap;

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::data::batch::{ImageBatch, Minibatch};
use crate::data::image_db::ImageDb;
use crate::data::transform::{check_channels, crop_into, Placement};
use crate::error::{Result, TrainError};

/// Blocking source of minibatches consumed by the trainer.
pub trait DataStream {
    /// Next minibatch, or `None` once a finite stream is exhausted.
    fn next_batch(&mut self) -> Result<Option<Minibatch>>;
    /// Total number of samples in one full pass.
    fn size(&self) -> usize;
    /// Restarts iteration from the first sample.
    fn reset(&mut self);
}

impl<S: DataStream + ?Sized> DataStream for Box<S> {
    fn next_batch(&mut self) -> Result<Option<Minibatch>> {
        (**self).next_batch()
    }

    fn size(&self) -> usize {
        (**self).size()
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

/// Geometry and augmentation knobs shared by both stream modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    pub batch: usize,
    /// Side of the square crop delivered to the network.
    pub crop: usize,
    pub channels: usize,
    /// Maximum random crop offset during training.
    pub shift: usize,
    pub stratify: bool,
    pub seed: u64,
}

fn assemble(db: &ImageDb, indices: &[usize], opts: &StreamOptions, placements: &[Placement]) -> Minibatch {
    let header = db.header();
    let mut data = Vec::with_capacity(indices.len() * opts.crop * opts.crop * opts.channels);
    let mut labels = Vec::with_capacity(indices.len());
    for (&index, &placement) in indices.iter().zip(placements) {
        let (label, pixels) = db.record(index);
        crop_into(pixels, &header, opts.crop, opts.channels, placement, &mut data);
        labels.push(label as usize);
    }
    Minibatch {
        labels,
        images: ImageBatch::new(indices.len(), opts.crop, opts.crop, opts.channels, data),
    }
}

fn validate(db: &ImageDb, opts: &StreamOptions) -> Result<()> {
    if opts.batch == 0 || opts.crop == 0 {
        return Err(TrainError::config("batch and crop size must be positive"));
    }
    check_channels(db.header().channels, opts.channels)
}

// ── Training mode ───────────────────────────────────────────────────────────

/// Infinite shuffling stream.
pub struct TrainStream {
    db: ImageDb,
    opts: StreamOptions,
    rng: StdRng,
    order: Vec<usize>,
    cursor: usize,
}

impl TrainStream {
    pub fn new(db: ImageDb, opts: StreamOptions) -> Result<Self> {
        validate(&db, &opts)?;
        if db.is_empty() {
            return Err(TrainError::config(format!(
                "training set {} is empty", db.path().display()
            )));
        }
        let mut stream = Self {
            db,
            opts,
            rng: StdRng::seed_from_u64(opts.seed),
            order: Vec::new(),
            cursor: 0,
        };
        stream.reshuffle();
        Ok(stream)
    }

    /// New visiting order for the next pass.
    fn reshuffle(&mut self) {
        self.order = if self.opts.stratify {
            stratified_order(&self.db, &mut self.rng)
        } else {
            let mut order: Vec<usize> = (0..self.db.len()).collect();
            order.shuffle(&mut self.rng);
            order
        };
        self.cursor = 0;
    }
}

/// Per-class shuffled queues interleaved round-robin, so every window of
/// the pass sees the classes in proportion as long as they last.
fn stratified_order(db: &ImageDb, rng: &mut StdRng) -> Vec<usize> {
    let mut by_class: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for i in 0..db.len() {
        by_class.entry(db.label(i)).or_default().push(i);
    }
    let mut queues: Vec<Vec<usize>> = by_class.into_values().collect();
    for queue in &mut queues {
        queue.shuffle(rng);
    }
    let longest = queues.iter().map(Vec::len).max().unwrap_or(0);
    let mut order = Vec::with_capacity(db.len());
    for k in 0..longest {
        for queue in &queues {
            if let Some(&i) = queue.get(k) {
                order.push(i);
            }
        }
    }
    order
}

impl DataStream for TrainStream {
    fn next_batch(&mut self) -> Result<Option<Minibatch>> {
        let mut indices = Vec::with_capacity(self.opts.batch);
        while indices.len() < self.opts.batch {
            if self.cursor == self.order.len() {
                self.reshuffle();
            }
            indices.push(self.order[self.cursor]);
            self.cursor += 1;
        }
        let placements: Vec<Placement> = (0..indices.len())
            .map(|_| Placement::random(self.opts.shift, &mut self.rng))
            .collect();
        Ok(Some(assemble(&self.db, &indices, &self.opts, &placements)))
    }

    fn size(&self) -> usize {
        self.db.len()
    }

    /// Training streams loop forever; a reset only starts a fresh shuffle.
    fn reset(&mut self) {
        self.reshuffle();
    }
}

// ── Evaluation mode ─────────────────────────────────────────────────────────

/// Finite, deterministic pass in storage order.
pub struct EvalStream {
    db: ImageDb,
    opts: StreamOptions,
    cursor: usize,
}

impl EvalStream {
    pub fn new(db: ImageDb, opts: StreamOptions) -> Result<Self> {
        validate(&db, &opts)?;
        Ok(Self { db, opts, cursor: 0 })
    }
}

impl DataStream for EvalStream {
    fn next_batch(&mut self) -> Result<Option<Minibatch>> {
        if self.cursor >= self.db.len() {
            return Ok(None);
        }
        let end = (self.cursor + self.opts.batch).min(self.db.len());
        let indices: Vec<usize> = (self.cursor..end).collect();
        self.cursor = end;
        let placements = vec![Placement::center(); indices.len()];
        Ok(Some(assemble(&self.db, &indices, &self.opts, &placements)))
    }

    fn size(&self) -> usize {
        self.db.len()
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }
}
