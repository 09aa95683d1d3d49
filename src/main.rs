use argh::FromArgs;
use sprite_gan::{
    common::*,
    config::Config,
    convert,
    model::{SpriteGan, SpriteGanInit},
};

/// Generate sprites for a set of attributes from the latest checkpoint.
#[derive(FromArgs)]
struct Args {
    /// the config file.
    #[argh(option, default = "PathBuf::from(\"config.json5\")")]
    config: PathBuf,
    /// comma separated attribute indices, e.g. "3,11".
    #[argh(option, default = "String::new()")]
    types: String,
    /// number of sprites to generate.
    #[argh(option, default = "8")]
    count: usize,
    /// output PNG file.
    #[argh(option, default = "PathBuf::from(\"samples.png\")")]
    output: PathBuf,
}

fn main() -> Fallible<()> {
    pretty_env_logger::init();

    // Parse arguments
    let args: Args = argh::from_env();
    ensure!(args.count > 0, "count must be positive");
    let indices = parse_indices(&args.types)?;

    // load config
    let config = Config::open(&args.config)?;

    // build model and restore weights
    let mut model: SpriteGan = SpriteGanInit::new(&config).build()?;
    match model.load(config.checkpoint.dir.as_ref())? {
        Some(epoch) => info!("sampling from epoch {}", epoch),
        None => warn!("no checkpoint directory configured, sampling from untrained weights"),
    }

    let types = convert::multi_hot(
        &indices,
        config.model.num_types.get(),
        args.count,
        model.device(),
    )?;
    let images = model.sample(&types)?;
    let strip = convert::horizontal_strip(&convert::tensor_to_images(&images)?)?;
    strip
        .save(&args.output)
        .with_context(|| format!("unable to write {}", args.output.display()))?;

    info!("wrote {} sprites to {}", args.count, args.output.display());
    Ok(())
}

fn parse_indices(text: &str) -> Fallible<Vec<usize>> {
    text.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| {
            token
                .parse::<usize>()
                .with_context(|| format!("invalid attribute index {:?}", token))
        })
        .collect()
}
