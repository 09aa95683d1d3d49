use super::{
    decoder::{Decoder, DecoderInit, DecoderOutput},
    discriminator::{ImageDiscriminator, ImageDiscriminatorInit, LatentDiscriminator},
    encoder::Encoder,
    prior::{LatentPrior, Phase, StandardNormal},
};

use crate::{
    checkpoint::{self, CheckpointName, NetworkKind},
    common::*,
    config::{Config, ModelConfig, TrainingConfig},
    objective, params,
};

/// The losses of one training step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StepLosses {
    pub reconstruction: f64,
    /// Sum of the weighted image and latent adversarial terms of the generator.
    pub adversarial: f64,
    pub generator_total: f64,
    pub latent_discriminator: f64,
    pub image_discriminator: f64,
}

impl StepLosses {
    pub fn is_finite(&self) -> bool {
        [
            self.reconstruction,
            self.adversarial,
            self.generator_total,
            self.latent_discriminator,
            self.image_discriminator,
        ]
        .iter()
        .all(|value| value.is_finite())
    }
}

#[derive(Debug, Clone)]
pub struct SpriteGanInit {
    pub model: ModelConfig,
    pub training: TrainingConfig,
    pub keep_epochs: usize,
    pub device: Device,
}

impl SpriteGanInit {
    pub fn new(config: &Config) -> Self {
        Self {
            model: config.model.clone(),
            training: config.training.clone(),
            keep_epochs: config.checkpoint.keep_epochs.get(),
            device: config.device,
        }
    }

    pub fn build(self) -> Fallible<SpriteGan> {
        self.build_with_prior(Box::new(StandardNormal))
    }

    pub fn build_with_prior(self, prior: Box<dyn LatentPrior + Send>) -> Fallible<SpriteGan> {
        let Self {
            model,
            training,
            keep_epochs,
            device,
        } = self;

        model.validate()?;
        // batch norm needs more than one example per batch in training mode
        ensure!(
            training.batch_size.get() > 1,
            "batch_size must be at least 2, but get {}",
            training.batch_size
        );
        ensure!(
            training.learning_rate > 0.0,
            "learning_rate must be positive, but get {}",
            training.learning_rate
        );

        let image_size = model.image_size.get() as i64;
        let num_types = model.num_types.get() as i64;
        let latent_dim = model.latent_dim.get() as i64;
        let generator_filters = model.generator_filters.get() as i64;
        let discriminator_filters = model.discriminator_filters.get() as i64;
        let palette_channels = model.palette_channels.get() as i64;
        let batch_size = training.batch_size.get() as i64;

        let generator_vs = VarStore::new(device);
        let disc_image_vs = VarStore::new(device);
        let disc_latent_vs = VarStore::new(device);

        let (encoder, decoder) = {
            let root = generator_vs.root();
            let encoder = Encoder::new(
                &root / NetworkKind::Encoder.suffix(),
                generator_filters,
                latent_dim,
                image_size,
            )?;
            let decoder = DecoderInit {
                num_filters: generator_filters,
                latent_dim,
                num_types,
                palette_channels,
                image_size,
            }
            .build(&root / NetworkKind::Decoder.suffix())?;
            (encoder, decoder)
        };

        let disc_image = ImageDiscriminatorInit {
            num_filters: discriminator_filters,
            num_types,
            image_size,
        }
        .build(disc_image_vs.root() / NetworkKind::ImageDiscriminator.suffix())?;

        let disc_latent = LatentDiscriminator::new(
            disc_latent_vs.root() / NetworkKind::LatentDiscriminator.suffix(),
            discriminator_filters,
            latent_dim,
        );

        let adam = || nn::Adam {
            beta1: training.adam_beta1,
            beta2: training.adam_beta2,
            ..Default::default()
        };
        let learning_rate = training.learning_rate;
        let opt_generator = adam().build(&generator_vs, learning_rate)?;
        let opt_disc_image = adam().build(&disc_image_vs, learning_rate / 2.0)?;
        let opt_disc_latent = adam().build(&disc_latent_vs, learning_rate / 2.0)?;

        let real_labels = Tensor::ones(&[batch_size], (Kind::Float, device));
        let fake_labels = Tensor::zeros(&[batch_size], (Kind::Float, device));

        info!(
            "built sprite GAN on {:?}: image_size={}, num_types={}, latent_dim={}, batch_size={}",
            device, image_size, num_types, latent_dim, batch_size
        );

        Ok(SpriteGan {
            device,
            batch_size,
            image_size,
            num_types,
            latent_dim,
            keep_epochs,
            image_adversarial_weight: training.image_adversarial_weight,
            latent_adversarial_weight: training.latent_adversarial_weight,
            generator_vs,
            disc_image_vs,
            disc_latent_vs,
            encoder,
            decoder,
            disc_image,
            disc_latent,
            opt_generator,
            opt_disc_image,
            opt_disc_latent,
            real_labels,
            fake_labels,
            prior,
        })
    }
}

/// Conditional sprite generator trained as an autoencoder and a GAN at once.
///
/// The encoder and the decoder share one optimizer. Each discriminator has
/// its own optimizer running at half the generator's learning rate.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct SpriteGan {
    device: Device,
    batch_size: i64,
    image_size: i64,
    num_types: i64,
    latent_dim: i64,
    keep_epochs: usize,
    image_adversarial_weight: f64,
    latent_adversarial_weight: f64,
    #[derivative(Debug = "ignore")]
    generator_vs: VarStore,
    #[derivative(Debug = "ignore")]
    disc_image_vs: VarStore,
    #[derivative(Debug = "ignore")]
    disc_latent_vs: VarStore,
    encoder: Encoder,
    decoder: Decoder,
    disc_image: ImageDiscriminator,
    disc_latent: LatentDiscriminator,
    #[derivative(Debug = "ignore")]
    opt_generator: nn::Optimizer,
    #[derivative(Debug = "ignore")]
    opt_disc_image: nn::Optimizer,
    #[derivative(Debug = "ignore")]
    opt_disc_latent: nn::Optimizer,
    real_labels: Tensor,
    fake_labels: Tensor,
    #[derivative(Debug = "ignore")]
    prior: Box<dyn LatentPrior + Send>,
}

impl SpriteGan {
    pub fn device(&self) -> Device {
        self.device
    }

    pub fn batch_size(&self) -> i64 {
        self.batch_size
    }

    /// Runs one discriminator update followed by one generator update.
    ///
    /// The inputs are checked before any forward pass, so a rejected batch
    /// leaves every parameter and optimizer untouched.
    pub fn step(&mut self, images: &Tensor, types: &Tensor) -> Fallible<StepLosses> {
        let batch_size = self.check_images(images)?;
        self.check_types(types, Some(batch_size))?;
        ensure!(
            batch_size == self.batch_size,
            "expect batch size {}, but get {}",
            self.batch_size,
            batch_size
        );

        let (image_disc_loss, latent_disc_loss) = self.discriminator_phase(images, types);
        let (reconstruction_loss, adversarial_loss, generator_loss) =
            self.generator_phase(images, types);

        let losses = StepLosses {
            reconstruction: reconstruction_loss.double_value(&[]),
            adversarial: adversarial_loss.double_value(&[]),
            generator_total: generator_loss.double_value(&[]),
            latent_discriminator: latent_disc_loss.double_value(&[]),
            image_discriminator: image_disc_loss.double_value(&[]),
        };

        if losses.is_finite() {
            debug!("step losses {}", serde_json::to_string(&losses)?);
        } else {
            warn!("non-finite losses {:?}", losses);
        }

        Ok(losses)
    }

    fn discriminator_phase(&mut self, images: &Tensor, types: &Tensor) -> (Tensor, Tensor) {
        self.opt_disc_image.zero_grad();
        self.opt_disc_latent.zero_grad();

        let latents = self.prior.draw(
            Phase::Discriminator,
            self.batch_size,
            self.latent_dim,
            self.device,
        );

        // frozen targets, no gradient reaches the encoder or the decoder
        let (generated, encoded, reconstructed, reencoded) = tch::no_grad(|| {
            let generated = self.decoder.forward_t(&latents, types, true);
            let encoded = self.encoder.forward_t(images, true);
            let reconstructed = self.decoder.forward_t(&encoded, types, true);
            let reencoded = self.encoder.forward_t(&generated, true);
            (generated, encoded, reconstructed, reencoded)
        });

        let image_loss = objective::discriminator_loss(
            &self.disc_image.forward_t(images, types, true),
            &[
                &self.disc_image.forward_t(&generated, types, true),
                &self.disc_image.forward_t(&reconstructed, types, true),
            ],
            &self.real_labels,
            &self.fake_labels,
        );
        let latent_loss = objective::discriminator_loss(
            &self.disc_latent.forward_t(&latents, true),
            &[
                &self.disc_latent.forward_t(&encoded, true),
                &self.disc_latent.forward_t(&reencoded, true),
            ],
            &self.real_labels,
            &self.fake_labels,
        );

        (&image_loss + &latent_loss).backward();
        self.opt_disc_image.step();
        self.opt_disc_latent.step();

        (image_loss.detach(), latent_loss.detach())
    }

    fn generator_phase(&mut self, images: &Tensor, types: &Tensor) -> (Tensor, Tensor, Tensor) {
        self.opt_generator.zero_grad();

        let latents = self.prior.draw(
            Phase::Generator,
            self.batch_size,
            self.latent_dim,
            self.device,
        );

        let generated = self.decoder.forward_t(&latents, types, true);
        let encoded = self.encoder.forward_t(images, true);
        let reconstructed = self.decoder.forward_t(&encoded, types, true);
        let reencoded = self.encoder.forward_t(&generated, true);

        let image_adversarial = objective::generator_adversarial_loss(
            &[
                &self.disc_image.forward_t(&generated, types, true),
                &self.disc_image.forward_t(&reconstructed, types, true),
            ],
            &self.real_labels,
        ) * self.image_adversarial_weight;
        let latent_adversarial = objective::generator_adversarial_loss(
            &[
                &self.disc_latent.forward_t(&encoded, true),
                &self.disc_latent.forward_t(&reencoded, true),
            ],
            &self.real_labels,
        ) * self.latent_adversarial_weight;
        let reconstruction = objective::reconstruction_loss(&reconstructed, images);

        let adversarial = image_adversarial + latent_adversarial;
        let total = &reconstruction + &adversarial;

        total.backward();
        self.opt_generator.step();

        (reconstruction.detach(), adversarial.detach(), total.detach())
    }

    /// Generates one image per attribute row from fresh prior latents.
    pub fn sample(&mut self, types: &Tensor) -> Fallible<Tensor> {
        let batch_size = self.check_types(types, None)?;
        let latents = self
            .prior
            .draw(Phase::Sampling, batch_size, self.latent_dim, self.device);
        let images = tch::no_grad(|| self.decoder.forward_t(&latents, types, false));
        Ok(images)
    }

    /// Encodes and decodes `images` in inference mode without tracking gradients.
    pub fn reconstruct(&self, images: &Tensor, types: &Tensor) -> Fallible<Tensor> {
        tch::no_grad(|| self.reconstruct_t(images, types, false))
    }

    /// Encodes and decodes `images`; gradient tracking is left to the caller.
    pub fn reconstruct_t(&self, images: &Tensor, types: &Tensor, train: bool) -> Fallible<Tensor> {
        let latents = self.encode_t(images, train)?;
        self.decode_t(&latents, types, train)
    }

    pub fn encode_t(&self, images: &Tensor, train: bool) -> Fallible<Tensor> {
        self.check_images(images)?;
        Ok(self.encoder.forward_t(images, train))
    }

    pub fn decode_t(&self, latents: &Tensor, types: &Tensor, train: bool) -> Fallible<Tensor> {
        let batch_size = self.check_latents(latents)?;
        self.check_types(types, Some(batch_size))?;
        Ok(self.decoder.forward_t(latents, types, train))
    }

    /// Like `decode_t`, but also returns the per-pixel palette distribution.
    pub fn decode_with_palette_t(
        &self,
        latents: &Tensor,
        types: &Tensor,
        train: bool,
    ) -> Fallible<DecoderOutput> {
        let batch_size = self.check_latents(latents)?;
        self.check_types(types, Some(batch_size))?;
        Ok(self.decoder.forward_with_palette_t(latents, types, train))
    }

    /// Writes the four sub-networks for `epoch` into `dir`, then drops
    /// checkpoints beyond the most recent `keep_epochs` epochs.
    pub fn save<P>(&self, dir: P, epoch: usize) -> Fallible<()>
    where
        P: AsRef<Path>,
    {
        let dir = dir.as_ref();
        let names = NetworkKind::ALL
            .iter()
            .map(|&kind| CheckpointName::new(epoch, kind))
            .collect::<Fallible<Vec<_>>>()?;

        fs::create_dir_all(dir)
            .with_context(|| format!("unable to create directory {}", dir.display()))?;

        for name in names {
            let path = dir.join(name.file_name());
            checkpoint::save_tensors(&path, &self.named_variables(name.kind))?;
        }
        info!("saved checkpoint of epoch {} to {}", epoch, dir.display());

        let removed = checkpoint::enforce_retention(dir, self.keep_epochs)?;
        if !removed.is_empty() {
            info!("removed {} stale checkpoint files", removed.len());
        }

        Ok(())
    }

    /// Restores all four sub-networks from the most recent epoch in `dir`
    /// and returns that epoch. Does nothing when `dir` is `None`.
    ///
    /// Every file is read and checked before any parameter is overwritten.
    pub fn load<P>(&mut self, dir: Option<P>) -> Fallible<Option<usize>>
    where
        P: AsRef<Path>,
    {
        let dir = match dir {
            Some(dir) => dir,
            None => return Ok(None),
        };
        let dir = dir.as_ref();

        let group = checkpoint::latest_group(dir)?
            .ok_or_else(|| format_err!("no checkpoint found in {}", dir.display()))?;
        let epoch = group.epoch;

        let restored = NetworkKind::ALL
            .iter()
            .map(|&kind| -> Fallible<Vec<(Tensor, Tensor)>> {
                let path = group.path_of(kind).ok_or_else(|| {
                    format_err!(
                        "the {} checkpoint of epoch {} is missing in {}",
                        kind.suffix(),
                        epoch,
                        dir.display()
                    )
                })?;
                let mut tensors = checkpoint::load_tensors(path, self.device)?;

                let pairs = self
                    .named_variables(kind)
                    .into_iter()
                    .map(|(name, var)| -> Fallible<(Tensor, Tensor)> {
                        let tensor = tensors.remove(&name).ok_or_else(|| {
                            format_err!("{} lacks variable {}", path.display(), name)
                        })?;
                        ensure!(
                            tensor.size() == var.size() && tensor.kind() == var.kind(),
                            "variable {} in {} has shape {:?} ({:?}), expect {:?} ({:?})",
                            name,
                            path.display(),
                            tensor.size(),
                            tensor.kind(),
                            var.size(),
                            var.kind()
                        );
                        Ok((var, tensor))
                    })
                    .collect::<Fallible<Vec<_>>>()?;

                ensure!(
                    tensors.is_empty(),
                    "{} contains unknown variables {:?}",
                    path.display(),
                    tensors.keys().sorted().collect::<Vec<_>>()
                );
                Ok(pairs)
            })
            .collect::<Fallible<Vec<_>>>()?;

        tch::no_grad(|| {
            restored
                .into_iter()
                .flatten()
                .for_each(|(mut var, tensor)| var.copy_(&tensor));
        });

        info!("loaded checkpoint of epoch {} from {}", epoch, dir.display());
        Ok(Some(epoch))
    }

    /// Variables of one sub-network, including non-trainable buffers, sorted by name.
    pub fn named_variables(&self, kind: NetworkKind) -> Vec<(String, Tensor)> {
        let prefix = format!("{}.", kind.suffix());
        self.var_store(kind)
            .variables()
            .into_iter()
            .filter(|(name, _)| name.starts_with(&prefix))
            .sorted_by(|(lhs, _), (rhs, _)| lhs.cmp(rhs))
            .collect()
    }

    fn var_store(&self, kind: NetworkKind) -> &VarStore {
        match kind {
            NetworkKind::Encoder | NetworkKind::Decoder => &self.generator_vs,
            NetworkKind::ImageDiscriminator => &self.disc_image_vs,
            NetworkKind::LatentDiscriminator => &self.disc_latent_vs,
        }
    }

    fn check_device(&self, tensor: &Tensor, what: &str) -> Fallible<()> {
        ensure!(
            tensor.device() == self.device,
            "{} are placed on {:?}, but the model is on {:?}",
            what,
            tensor.device(),
            self.device
        );
        ensure!(
            tensor.kind() == Kind::Float,
            "{} must be {:?} tensors, but get {:?}",
            what,
            Kind::Float,
            tensor.kind()
        );
        Ok(())
    }

    fn check_images(&self, images: &Tensor) -> Fallible<i64> {
        self.check_device(images, "images")?;
        let (batch_size, channels, height, width) = images
            .size4()
            .with_context(|| format!("images must be 4-dimensional, but get {:?}", images.size()))?;
        ensure!(
            channels == params::IMAGE_CHANNELS,
            "images must have {} channels, but get {}",
            params::IMAGE_CHANNELS,
            channels
        );
        ensure!(
            height == self.image_size && width == self.image_size,
            "images must be {}x{}, but get {}x{}",
            self.image_size,
            self.image_size,
            height,
            width
        );
        Ok(batch_size)
    }

    fn check_types(&self, types: &Tensor, batch_size: Option<i64>) -> Fallible<i64> {
        self.check_device(types, "attribute vectors")?;
        let (batch, num_types) = types.size2().with_context(|| {
            format!(
                "attribute vectors must be 2-dimensional, but get {:?}",
                types.size()
            )
        })?;
        ensure!(
            num_types == self.num_types,
            "attribute vectors must have width {}, but get {}",
            self.num_types,
            num_types
        );
        if let Some(batch_size) = batch_size {
            ensure!(
                batch == batch_size,
                "expect {} attribute vectors, but get {}",
                batch_size,
                batch
            );
        }
        Ok(batch)
    }

    fn check_latents(&self, latents: &Tensor) -> Fallible<i64> {
        self.check_device(latents, "latent vectors")?;
        let (batch_size, latent_dim) = latents.size2().with_context(|| {
            format!(
                "latent vectors must be 2-dimensional, but get {:?}",
                latents.size()
            )
        })?;
        ensure!(
            latent_dim == self.latent_dim,
            "latent vectors must have width {}, but get {}",
            self.latent_dim,
            latent_dim
        );
        Ok(batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::CheckpointConfig, model::SeededNormal};

    fn tiny_config() -> Config {
        Config {
            model: ModelConfig {
                image_size: NonZeroUsize::new(32).unwrap(),
                num_types: NonZeroUsize::new(4).unwrap(),
                latent_dim: NonZeroUsize::new(8).unwrap(),
                generator_filters: NonZeroUsize::new(2).unwrap(),
                discriminator_filters: NonZeroUsize::new(2).unwrap(),
                palette_channels: NonZeroUsize::new(4).unwrap(),
            },
            training: TrainingConfig::new(NonZeroUsize::new(2).unwrap()),
            checkpoint: CheckpointConfig::default(),
            device: Device::Cpu,
        }
    }

    fn batch(batch_size: i64) -> (Tensor, Tensor) {
        let images = Tensor::rand(&[batch_size, 3, 32, 32], (Kind::Float, Device::Cpu)) * 2.0 - 1.0;
        let types = Tensor::zeros(&[batch_size, 4], (Kind::Float, Device::Cpu));
        (images, types)
    }

    #[test]
    fn reject_wrong_batch_size_before_update() {
        let mut model = SpriteGanInit::new(&tiny_config()).build().unwrap();
        let before = model.named_variables(NetworkKind::ImageDiscriminator);
        let before = before
            .iter()
            .map(|(_, tensor)| tensor.copy())
            .collect::<Vec<_>>();

        let (images, types) = batch(3);
        assert!(model.step(&images, &types).is_err());

        let after = model.named_variables(NetworkKind::ImageDiscriminator);
        for (old, (_, new)) in before.iter().zip(after.iter()) {
            assert_eq!((old - new).abs().sum(Kind::Float).double_value(&[]), 0.0);
        }
    }

    #[test]
    fn reject_contract_violations() {
        let mut model = SpriteGanInit::new(&tiny_config()).build().unwrap();
        let (images, types) = batch(2);

        let gray = Tensor::zeros(&[2, 1, 32, 32], (Kind::Float, Device::Cpu));
        assert!(model.step(&gray, &types).is_err());

        let wide_types = Tensor::zeros(&[2, 5], (Kind::Float, Device::Cpu));
        assert!(model.step(&images, &wide_types).is_err());
        assert!(model.sample(&wide_types).is_err());

        let short_latents = Tensor::zeros(&[2, 7], (Kind::Float, Device::Cpu));
        assert!(model.decode_t(&short_latents, &types, false).is_err());

        let small_images = Tensor::zeros(&[2, 3, 16, 16], (Kind::Float, Device::Cpu));
        assert!(model.reconstruct(&small_images, &types).is_err());

        let int_types = Tensor::zeros(&[2, 4], (Kind::Int64, Device::Cpu));
        assert!(model.sample(&int_types).is_err());
    }

    #[test]
    fn reject_single_example_batches() {
        let mut config = tiny_config();
        config.training = TrainingConfig::new(NonZeroUsize::new(1).unwrap());
        assert!(SpriteGanInit::new(&config).build().is_err());
    }

    #[test]
    fn seeded_prior_reproduces_steps() {
        let run = || {
            tch::manual_seed(0);
            let mut model = SpriteGanInit::new(&tiny_config())
                .build_with_prior(Box::new(SeededNormal::new(10, 20, 30)))
                .unwrap();
            tch::manual_seed(1);
            let (images, types) = batch(2);
            model.step(&images, &types).unwrap()
        };

        let first = run();
        let second = run();
        assert!(first.is_finite());
        assert!((first.generator_total - second.generator_total).abs() < 1e-6);
        assert!((first.image_discriminator - second.image_discriminator).abs() < 1e-6);
        assert!((first.latent_discriminator - second.latent_discriminator).abs() < 1e-6);
    }

    #[test]
    fn losses_report_non_finite_values() {
        let losses = StepLosses {
            reconstruction: 0.1,
            adversarial: f64::NAN,
            generator_total: 0.2,
            latent_discriminator: 0.3,
            image_discriminator: 0.4,
        };
        assert!(!losses.is_finite());
        assert!(StepLosses {
            adversarial: 0.0,
            ..losses
        }
        .is_finite());
    }
}
