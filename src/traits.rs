use crate::{event::Event, reco::RecoEvent};

/// Progress indicator
pub trait Progress {
    /// Advance by the given amount
    fn inc(&self, i: u64);

    /// Finish progress
    fn finish(&self);
}

/// Reconstruction of physics objects from the outgoing particles
pub trait Reconstruct {
    type Error;

    fn reconstruct(&self, ev: Event) -> Result<RecoEvent, Self::Error>;
}
