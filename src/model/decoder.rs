use super::palette::ColorPalette;
use crate::{common::*, params};

#[derive(Debug)]
struct UpBlock {
    conv: nn::Conv2D,
    bn: nn::BatchNorm,
}

impl UpBlock {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let net = xs.apply(&self.conv).apply_t(&self.bn, train).relu();
        let (_b, _c, height, width) = net.size4().unwrap();
        net.upsample_nearest2d(&[height * 2, width * 2], None::<f64>, None::<f64>)
    }
}

#[derive(Debug, Clone)]
pub struct DecoderInit {
    pub num_filters: i64,
    pub latent_dim: i64,
    pub num_types: i64,
    pub palette_channels: i64,
    pub image_size: i64,
}

impl DecoderInit {
    pub fn build<'p, P>(self, path: P) -> Fallible<Decoder>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();

        let Self {
            num_filters,
            latent_dim,
            num_types,
            palette_channels,
            image_size,
        } = self;

        let seed_factor = 1 << params::DECODER_UPSAMPLINGS;
        ensure!(
            image_size > 0 && image_size % seed_factor == 0,
            "decoder image_size must be a positive multiple of {}, but get {}",
            seed_factor,
            image_size
        );

        let feature_dim = 16 * num_filters;
        let seed_size = image_size / seed_factor;

        let fc = nn::linear(
            path / "fc",
            latent_dim + num_types,
            feature_dim,
            Default::default(),
        );
        let fc_bn = nn::batch_norm1d(path / "fc_bn", feature_dim, Default::default());

        let conv_config = ConvConfig {
            padding: 1,
            stride: 1,
            ..Default::default()
        };

        // 16F -> 8F -> 4F -> 2F -> F -> F
        let widths = [
            feature_dim,
            8 * num_filters,
            4 * num_filters,
            2 * num_filters,
            num_filters,
            num_filters,
        ];
        debug_assert_eq!(widths.len() - 1, params::DECODER_UPSAMPLINGS);

        let blocks = widths
            .iter()
            .tuple_windows()
            .enumerate()
            .map(|(index, (&in_channels, &out_channels))| {
                let block_path = path / format!("up{}", index + 1);
                UpBlock {
                    conv: nn::conv2d(&block_path / "conv", in_channels, out_channels, 3, conv_config),
                    bn: nn::batch_norm2d(&block_path / "bn", out_channels, Default::default()),
                }
            })
            .collect::<Vec<_>>();

        let palette_conv = nn::conv2d(
            path / "palette_conv",
            num_filters,
            palette_channels,
            3,
            conv_config,
        );

        let color_pickers = ["r", "g", "b"]
            .iter()
            .map(|name| {
                ColorPalette::new(
                    path / format!("color_picker_{}", name),
                    feature_dim,
                    palette_channels,
                )
            })
            .collect::<Vec<_>>();

        Ok(Decoder {
            latent_dim,
            num_types,
            palette_channels,
            seed_size,
            fc,
            fc_bn,
            blocks,
            palette_conv,
            color_pickers,
        })
    }
}

/// Maps a latent vector and an attribute vector to an image.
///
/// The trunk produces a per-pixel distribution over `palette_channels`
/// candidate colors. Each of the three output colors picks its own weighting
/// over those candidates, so the spatial layout is shared while the colors
/// are chosen separately.
///
/// Input shapes are only checked in debug builds; `SpriteGan` validates
/// them before calling in.
#[derive(Debug)]
pub struct Decoder {
    latent_dim: i64,
    num_types: i64,
    palette_channels: i64,
    seed_size: i64,
    fc: nn::Linear,
    fc_bn: nn::BatchNorm,
    blocks: Vec<UpBlock>,
    palette_conv: nn::Conv2D,
    color_pickers: Vec<ColorPalette>,
}

impl Decoder {
    pub fn forward_t(&self, latents: &Tensor, types: &Tensor, train: bool) -> Tensor {
        self.forward_with_palette_t(latents, types, train).image
    }

    pub fn forward_with_palette_t(
        &self,
        latents: &Tensor,
        types: &Tensor,
        train: bool,
    ) -> DecoderOutput {
        let (batch_size, latent_dim) = latents.size2().unwrap();
        debug_assert_eq!(latent_dim, self.latent_dim);
        {
            let (b, t) = types.size2().unwrap();
            debug_assert_eq!(b, batch_size);
            debug_assert_eq!(t, self.num_types);
        }

        let features = Tensor::cat(&[latents, types], 1)
            .apply(&self.fc)
            .apply_t(&self.fc_bn, train)
            .relu();

        let seed = features.view([batch_size, -1, 1, 1]).expand(
            &[batch_size, -1, self.seed_size, self.seed_size],
            false,
        );

        let trunk = self
            .blocks
            .iter()
            .fold(seed, |net, block| block.forward_t(&net, train));
        let palette = trunk.apply(&self.palette_conv).softmax(1, Kind::Float);
        let (_b, _c, height, width) = palette.size4().unwrap();

        let channels = self
            .color_pickers
            .iter()
            .map(|picker| {
                let weights = picker
                    .forward_t(&features, train)
                    .view([batch_size, self.palette_channels, 1, 1])
                    .expand(&[batch_size, self.palette_channels, height, width], false);
                (&palette * weights).sum_dim_intlist(&[1], true, Kind::Float)
            })
            .collect::<Vec<_>>();
        let image = Tensor::cat(&channels, 1);

        DecoderOutput { image, palette }
    }
}

pub struct DecoderOutput {
    pub image: Tensor,
    pub palette: Tensor,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_decoder(vs: &VarStore) -> Decoder {
        DecoderInit {
            num_filters: 2,
            latent_dim: 8,
            num_types: 4,
            palette_channels: 5,
            image_size: 64,
        }
        .build(vs.root() / "decoder")
        .unwrap()
    }

    fn random_types(batch_size: i64) -> Tensor {
        Tensor::rand(&[batch_size, 4], (Kind::Float, Device::Cpu))
            .gt(0.5)
            .to_kind(Kind::Float)
    }

    #[test]
    fn image_shape_and_range() {
        let vs = VarStore::new(Device::Cpu);
        let decoder = tiny_decoder(&vs);

        for &scale in &[1.0, 10.0, 1000.0] {
            let latents = Tensor::randn(&[3, 8], (Kind::Float, Device::Cpu)) * scale;
            let images = decoder.forward_t(&latents, &random_types(3), true);
            assert_eq!(images.size(), vec![3, 3, 64, 64]);
            assert!(images.max().double_value(&[]) <= 1.0);
            assert!(images.min().double_value(&[]) >= -1.0);
        }
    }

    #[test]
    fn reject_unaligned_image_size() {
        let vs = VarStore::new(Device::Cpu);
        let init = DecoderInit {
            num_filters: 2,
            latent_dim: 8,
            num_types: 4,
            palette_channels: 5,
            image_size: 48,
        };
        assert!(init.build(vs.root() / "decoder").is_err());
    }

    #[test]
    fn upsampling_doubles_each_block() {
        let vs = VarStore::new(Device::Cpu);
        let decoder = tiny_decoder(&vs);
        let xs = Tensor::randn(&[2, 32, 2, 2], (Kind::Float, Device::Cpu));
        let ys = decoder.blocks[0].forward_t(&xs, true);
        assert_eq!(ys.size(), vec![2, 16, 4, 4]);

        // each output pixel repeats its 2x2 neighborhood
        let top_left = ys.narrow(2, 0, 2).narrow(3, 0, 2);
        let corner = top_left.narrow(2, 0, 1).narrow(3, 0, 1);
        assert_eq!((top_left - corner).abs().max().double_value(&[]), 0.0);
    }

    #[test]
    fn palette_sums_to_one() {
        let vs = VarStore::new(Device::Cpu);
        let decoder = tiny_decoder(&vs);
        let latents = Tensor::randn(&[2, 8], (Kind::Float, Device::Cpu));

        let DecoderOutput { palette, .. } =
            tch::no_grad(|| decoder.forward_with_palette_t(&latents, &random_types(2), false));
        assert_eq!(palette.size(), vec![2, 5, 64, 64]);

        let total = palette.sum_dim_intlist(&[1], false, Kind::Float);
        let max_error = (total - 1.0).abs().max().double_value(&[]);
        assert!(max_error < 1e-5, "max error {}", max_error);
    }
}
