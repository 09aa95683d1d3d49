use crate::{common::*, params};

/// Maps an image to a latent vector.
///
/// Input shapes are only checked in debug builds; `SpriteGan` validates
/// them before calling in.
#[derive(Debug)]
pub struct Encoder {
    convs: Vec<nn::Conv2D>,
    fc: nn::Linear,
}

impl Encoder {
    pub fn new<'p, P>(
        path: P,
        num_filters: i64,
        latent_dim: i64,
        image_size: i64,
    ) -> Fallible<Encoder>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let reduced_size = reduced_size(image_size)?;

        let conv_config = ConvConfig {
            padding: 2,
            stride: 2,
            ..Default::default()
        };

        let channels = [
            params::IMAGE_CHANNELS,
            num_filters,
            2 * num_filters,
            4 * num_filters,
            8 * num_filters,
        ];
        let convs = channels
            .iter()
            .tuple_windows()
            .enumerate()
            .map(|(index, (&in_channels, &out_channels))| {
                nn::conv2d(
                    path / format!("conv{}", index + 1),
                    in_channels,
                    out_channels,
                    5,
                    conv_config,
                )
            })
            .collect::<Vec<_>>();

        let fc = nn::linear(
            path / "fc",
            8 * num_filters * reduced_size * reduced_size,
            latent_dim,
            Default::default(),
        );

        Ok(Encoder { convs, fc })
    }

    pub fn forward_t(&self, images: &Tensor, train: bool) -> Tensor {
        let (batch_size, channels, _h, _w) = images.size4().unwrap();
        debug_assert_eq!(channels, params::IMAGE_CHANNELS);

        let net = self.convs.iter().fold(images.shallow_clone(), |net, conv| {
            net.apply(conv)
                .dropout(params::ENCODER_DROPOUT, train)
                .leaky_relu()
        });

        net.view([batch_size, -1]).apply(&self.fc)
    }
}

/// Spatial size left after the four stride-2 convolutions.
pub(crate) fn reduced_size(image_size: i64) -> Fallible<i64> {
    let factor = params::DOWNSAMPLE_FACTOR as i64;
    ensure!(
        image_size > 0 && image_size % factor == 0,
        "image_size must be a positive multiple of {}, but get {}",
        factor,
        image_size
    );
    Ok(image_size / factor)
}
