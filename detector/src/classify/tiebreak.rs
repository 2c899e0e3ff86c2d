use element_detector_common::frame::ElementPosition;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Picks a side when a frame carries too little marker signal to decide.
pub trait TieBreak: Send {
    fn pick(&mut self) -> ElementPosition;
}

/// Fair coin between `Left` and `Right`.
pub struct RandomTieBreak<R = StdRng> {
    rng: R,
}

impl RandomTieBreak<StdRng> {
    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> RandomTieBreak<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl Default for RandomTieBreak<StdRng> {
    fn default() -> Self {
        Self::from_entropy()
    }
}

impl<R: Rng + Send> TieBreak for RandomTieBreak<R> {
    fn pick(&mut self) -> ElementPosition {
        if self.rng.gen_bool(0.5) {
            ElementPosition::Left
        } else {
            ElementPosition::Right
        }
    }
}

/// Always answers the same side.
#[derive(Debug, Clone, Copy)]
pub struct FixedTieBreak(pub ElementPosition);

impl TieBreak for FixedTieBreak {
    fn pick(&mut self) -> ElementPosition {
        self.0
    }
}
