use super::{
    encoder::reduced_size,
    spectral::{SnConv2D, SnConvTranspose2D, SnLinear},
};
use crate::{common::*, params};

#[derive(Debug, Clone)]
pub struct ImageDiscriminatorInit {
    pub num_filters: i64,
    pub num_types: i64,
    pub image_size: i64,
}

impl ImageDiscriminatorInit {
    pub fn build<'p, P>(self, path: P) -> Fallible<ImageDiscriminator>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();

        let Self {
            num_filters,
            num_types,
            image_size,
        } = self;
        let reduced_size = reduced_size(image_size)?;

        let conv_image = SnConv2D::new(
            path / "conv_image",
            params::IMAGE_CHANNELS,
            num_filters,
            4,
            2,
            1,
        );

        // spreads the attribute vector over the half-resolution map of conv_image
        let conv_types = SnConvTranspose2D::new(
            path / "conv_types",
            num_types,
            num_types,
            image_size / 2,
            1,
            0,
        );

        let widths = [
            num_filters + num_types,
            2 * num_filters,
            4 * num_filters,
            8 * num_filters,
        ];
        let convs = widths
            .iter()
            .tuple_windows()
            .enumerate()
            .map(|(index, (&in_channels, &out_channels))| {
                SnConv2D::new(
                    path / format!("conv{}", index + 1),
                    in_channels,
                    out_channels,
                    4,
                    2,
                    1,
                )
            })
            .collect::<Vec<_>>();

        let fc1 = SnLinear::new(
            path / "fc1",
            8 * num_filters * reduced_size * reduced_size,
            params::IMAGE_DISC_HIDDEN,
        );
        let fc2 = SnLinear::new(path / "fc2", params::IMAGE_DISC_HIDDEN, 1);

        Ok(ImageDiscriminator {
            num_types,
            conv_image,
            conv_types,
            convs,
            fc1,
            fc2,
        })
    }
}

/// Scores (image, attributes) pairs; higher logits mean "real".
///
/// Input shapes are only checked in debug builds.
#[derive(Debug)]
pub struct ImageDiscriminator {
    num_types: i64,
    conv_image: SnConv2D,
    conv_types: SnConvTranspose2D,
    convs: Vec<SnConv2D>,
    fc1: SnLinear,
    fc2: SnLinear,
}

impl ImageDiscriminator {
    /// Returns one logit per example, shape `(batch,)`.
    pub fn forward_t(&self, images: &Tensor, types: &Tensor, train: bool) -> Tensor {
        let (batch_size, _c, _h, _w) = images.size4().unwrap();
        {
            let (b, t) = types.size2().unwrap();
            debug_assert_eq!(b, batch_size);
            debug_assert_eq!(t, self.num_types);
        }

        let image_map = self.conv_image.forward_t(images, train).leaky_relu();
        let types_map = self
            .conv_types
            .forward_t(&types.view([batch_size, self.num_types, 1, 1]), train)
            .leaky_relu();

        let net = self.convs.iter().fold(
            Tensor::cat(&[image_map, types_map], 1),
            |net, conv| conv.forward_t(&net, train).leaky_relu(),
        );

        let net = net.view([batch_size, -1]);
        let net = self.fc1.forward_t(&net, train).leaky_relu();
        self.fc2.forward_t(&net, train).view([-1])
    }
}

/// Scores latent vectors; higher logits mean "drawn from the prior".
#[derive(Debug)]
pub struct LatentDiscriminator {
    latent_dim: i64,
    layers: Vec<SnLinear>,
}

impl LatentDiscriminator {
    pub fn new<'p, P>(path: P, num_filters: i64, latent_dim: i64) -> LatentDiscriminator
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();

        let widths = [latent_dim, 4 * num_filters, 2 * num_filters, num_filters, 1];
        let layers = widths
            .iter()
            .tuple_windows()
            .enumerate()
            .map(|(index, (&in_dim, &out_dim))| {
                SnLinear::new(path / format!("fc{}", index + 1), in_dim, out_dim)
            })
            .collect::<Vec<_>>();

        LatentDiscriminator { latent_dim, layers }
    }

    /// Returns one logit per example, shape `(batch,)`.
    pub fn forward_t(&self, latents: &Tensor, train: bool) -> Tensor {
        let (_b, latent_dim) = latents.size2().unwrap();
        debug_assert_eq!(latent_dim, self.latent_dim);

        let last = self.layers.len() - 1;
        let net = self
            .layers
            .iter()
            .enumerate()
            .fold(latents.shallow_clone(), |net, (index, layer)| {
                let net = layer.forward_t(&net, train);
                if index < last {
                    net.leaky_relu()
                } else {
                    net
                }
            });

        net.view([-1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_scores_shape() {
        let vs = VarStore::new(Device::Cpu);
        let disc = ImageDiscriminatorInit {
            num_filters: 2,
            num_types: 4,
            image_size: 32,
        }
        .build(vs.root() / "disc_image")
        .unwrap();

        let images = Tensor::rand(&[3, 3, 32, 32], (Kind::Float, Device::Cpu)) * 2.0 - 1.0;
        let types = Tensor::zeros(&[3, 4], (Kind::Float, Device::Cpu));
        let scores = disc.forward_t(&images, &types, true);
        assert_eq!(scores.size(), vec![3]);
    }

    #[test]
    fn single_example_keeps_batch_axis() {
        let vs = VarStore::new(Device::Cpu);
        let disc = LatentDiscriminator::new(vs.root() / "disc_latent", 2, 8);
        let latents = Tensor::randn(&[1, 8], (Kind::Float, Device::Cpu));
        let scores = disc.forward_t(&latents, false);
        assert_eq!(scores.size(), vec![1]);
    }

    #[test]
    fn attributes_change_image_scores() {
        let vs = VarStore::new(Device::Cpu);
        let disc = ImageDiscriminatorInit {
            num_filters: 2,
            num_types: 4,
            image_size: 32,
        }
        .build(vs.root() / "disc_image")
        .unwrap();

        let images = Tensor::rand(&[2, 3, 32, 32], (Kind::Float, Device::Cpu));
        let zeros = Tensor::zeros(&[2, 4], (Kind::Float, Device::Cpu));
        let ones = Tensor::ones(&[2, 4], (Kind::Float, Device::Cpu));

        let (a, b) = tch::no_grad(|| {
            (
                disc.forward_t(&images, &zeros, false),
                disc.forward_t(&images, &ones, false),
            )
        });
        assert!((a - b).abs().max().double_value(&[]) > 0.0);
    }

    #[test]
    fn reject_unaligned_image_size() {
        let vs = VarStore::new(Device::Cpu);
        let init = ImageDiscriminatorInit {
            num_filters: 2,
            num_types: 4,
            image_size: 36,
        };
        assert!(init.build(vs.root() / "disc_image").is_err());
    }
}
