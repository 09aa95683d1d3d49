mod decoder;
mod discriminator;
mod encoder;
mod model;
mod palette;
mod prior;
mod spectral;

pub use decoder::DecoderOutput;
pub use model::{SpriteGan, SpriteGanInit, StepLosses};
pub use prior::{LatentPrior, Phase, SeededNormal, StandardNormal};
