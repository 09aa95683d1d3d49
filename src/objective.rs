use crate::{common::*, params};

/// Discriminator loss for one of the two discriminators.
///
/// The real term counts twice and the sum is divided by four.
pub fn discriminator_loss(
    real_logits: &Tensor,
    fake_logits: &[&Tensor],
    real_labels: &Tensor,
    fake_labels: &Tensor,
) -> Tensor {
    let real_loss = bce(real_logits, real_labels) * params::REAL_TERM_WEIGHT;
    fake_logits
        .iter()
        .fold(real_loss, |sum, logits| sum + bce(logits, fake_labels))
        / params::DISC_LOSS_NORMALIZER
}

/// Non-saturating generator loss, the mean BCE of every term against "real".
pub fn generator_adversarial_loss(fake_logits: &[&Tensor], real_labels: &Tensor) -> Tensor {
    debug_assert!(!fake_logits.is_empty());
    let losses = fake_logits
        .iter()
        .map(|logits| bce(logits, real_labels))
        .collect::<Vec<_>>();
    Tensor::stack(&losses, 0).mean(Kind::Float)
}

/// Mean absolute error between a reconstruction and its source image.
pub fn reconstruction_loss(reconstruction: &Tensor, target: &Tensor) -> Tensor {
    reconstruction.l1_loss(target, Reduction::Mean)
}

fn bce(logits: &Tensor, labels: &Tensor) -> Tensor {
    logits.binary_cross_entropy_with_logits::<Tensor>(labels, None, None, Reduction::Mean)
}
