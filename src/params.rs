// input parameters
pub const IMAGE_SIZE: usize = 96;
pub const IMAGE_CHANNELS: i64 = 3;
pub const NUM_TYPES: usize = 18;

// hyper-parameters: networks
pub const LATENT_DIM: usize = 100;
pub const GENERATOR_FILTERS: usize = 64;
pub const DISCRIMINATOR_FILTERS: usize = 64;
pub const PALETTE_CHANNELS: usize = 16;
pub const PALETTE_HIDDEN_1: i64 = 128;
pub const PALETTE_HIDDEN_2: i64 = 64;
pub const IMAGE_DISC_HIDDEN: i64 = 1024;
pub const ENCODER_DROPOUT: f64 = 0.3;

// the decoder trunk doubles resolution this many times after the seed map
pub const DECODER_UPSAMPLINGS: usize = 5;
// the encoder and the image discriminator both shrink the image by this factor
pub const DOWNSAMPLE_FACTOR: usize = 16;

// hyper-parameters: spectral normalization
pub const SPECTRAL_NORM_EPS: f64 = 1e-12;

// hyper-parameters: ADAM optimization
pub const LEARNING_RATE: f64 = 2e-4;
pub const ADAM_BETA1: f64 = 0.5;
pub const ADAM_BETA2: f64 = 0.9;

// hyper-parameters: objective
pub const REAL_TERM_WEIGHT: f64 = 2.0;
pub const DISC_LOSS_NORMALIZER: f64 = 4.0;
pub const IMAGE_ADVERSARIAL_WEIGHT: f64 = 0.005;
pub const LATENT_ADVERSARIAL_WEIGHT: f64 = 0.1;

// checkpoints
pub const KEEP_EPOCHS: usize = 3;
