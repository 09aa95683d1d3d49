use crate::{common::*, params};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    pub training: TrainingConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(
        serialize_with = "serialize_device",
        deserialize_with = "deserialize_device",
        default = "default_device"
    )]
    pub device: Device,
}

impl Config {
    pub fn open<P>(path: P) -> Fallible<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config: Self = json5::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Fallible<()> {
        self.model.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub image_size: NonZeroUsize,
    pub num_types: NonZeroUsize,
    pub latent_dim: NonZeroUsize,
    pub generator_filters: NonZeroUsize,
    pub discriminator_filters: NonZeroUsize,
    pub palette_channels: NonZeroUsize,
}

impl ModelConfig {
    pub fn validate(&self) -> Fallible<()> {
        let seed_factor = 1 << params::DECODER_UPSAMPLINGS;
        ensure!(
            self.image_size.get() % seed_factor == 0,
            "image_size must be a multiple of {}, but get {}",
            seed_factor,
            self.image_size
        );
        Ok(())
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            image_size: NonZeroUsize::new(params::IMAGE_SIZE).unwrap(),
            num_types: NonZeroUsize::new(params::NUM_TYPES).unwrap(),
            latent_dim: NonZeroUsize::new(params::LATENT_DIM).unwrap(),
            generator_filters: NonZeroUsize::new(params::GENERATOR_FILTERS).unwrap(),
            discriminator_filters: NonZeroUsize::new(params::DISCRIMINATOR_FILTERS).unwrap(),
            palette_channels: NonZeroUsize::new(params::PALETTE_CHANNELS).unwrap(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub batch_size: NonZeroUsize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_adam_beta1")]
    pub adam_beta1: f64,
    #[serde(default = "default_adam_beta2")]
    pub adam_beta2: f64,
    #[serde(default = "default_image_adversarial_weight")]
    pub image_adversarial_weight: f64,
    #[serde(default = "default_latent_adversarial_weight")]
    pub latent_adversarial_weight: f64,
}

impl TrainingConfig {
    pub fn new(batch_size: NonZeroUsize) -> Self {
        Self {
            batch_size,
            learning_rate: params::LEARNING_RATE,
            adam_beta1: params::ADAM_BETA1,
            adam_beta2: params::ADAM_BETA2,
            image_adversarial_weight: params::IMAGE_ADVERSARIAL_WEIGHT,
            latent_adversarial_weight: params::LATENT_ADVERSARIAL_WEIGHT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub dir: Option<PathBuf>,
    #[serde(default = "default_keep_epochs")]
    pub keep_epochs: NonZeroUsize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: None,
            keep_epochs: default_keep_epochs(),
        }
    }
}

fn default_learning_rate() -> f64 {
    params::LEARNING_RATE
}

fn default_adam_beta1() -> f64 {
    params::ADAM_BETA1
}

fn default_adam_beta2() -> f64 {
    params::ADAM_BETA2
}

fn default_image_adversarial_weight() -> f64 {
    params::IMAGE_ADVERSARIAL_WEIGHT
}

fn default_latent_adversarial_weight() -> f64 {
    params::LATENT_ADVERSARIAL_WEIGHT
}

fn default_keep_epochs() -> NonZeroUsize {
    NonZeroUsize::new(params::KEEP_EPOCHS).unwrap()
}

fn default_device() -> Device {
    Device::cuda_if_available()
}

fn serialize_device<S>(device: &Device, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let text = match device {
        Device::Cpu => "cpu".into(),
        Device::Cuda(n) => format!("cuda({})", n),
    };
    text.serialize(serializer)
}

fn deserialize_device<'de, D>(deserializer: D) -> Result<Device, D::Error>
where
    D: Deserializer<'de>,
{
    let name = String::deserialize(deserializer)?;
    parse_device(&name).ok_or_else(|| D::Error::custom(format!("invalid device name {}", name)))
}

fn parse_device(name: &str) -> Option<Device> {
    if name == "cpu" {
        return Some(Device::Cpu);
    }

    let prefix = "cuda(";
    let suffix = ")";
    if name.starts_with(prefix) && name.ends_with(suffix) && name.len() > prefix.len() {
        let number: usize = name[(prefix.len())..(name.len() - suffix.len())]
            .parse()
            .ok()?;
        Some(Device::Cuda(number))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let text = r#"{
            training: { batch_size: 8 },
            checkpoint: { dir: "checkpoints" },
            device: "cpu",
        }"#;
        let config: Config = json5::from_str(text).unwrap();
        config.validate().unwrap();

        assert_eq!(config.device, Device::Cpu);
        assert_eq!(config.model, ModelConfig::default());
        assert_eq!(config.training.batch_size.get(), 8);
        assert_eq!(config.training.learning_rate, params::LEARNING_RATE);
        assert_eq!(config.checkpoint.keep_epochs.get(), params::KEEP_EPOCHS);
        assert_eq!(config.checkpoint.dir, Some(PathBuf::from("checkpoints")));
    }

    #[test]
    fn reject_unaligned_image_size() {
        let model = ModelConfig {
            image_size: NonZeroUsize::new(100).unwrap(),
            ..Default::default()
        };
        assert!(model.validate().is_err());
    }

    #[test]
    fn device_names() {
        assert_eq!(parse_device("cpu"), Some(Device::Cpu));
        assert_eq!(parse_device("cuda(1)"), Some(Device::Cuda(1)));
        assert_eq!(parse_device("cuda()"), None);
        assert_eq!(parse_device("tpu"), None);
    }
}
