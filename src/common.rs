pub use anyhow::{bail, ensure, format_err, Context, Error};
pub use derivative::Derivative;
pub use image::{ImageBuffer, Rgb, RgbImage};
pub use itertools::Itertools;
pub use log::{debug, info, warn};
pub use regex::Regex;
pub use serde::{
    de::Error as DeserializeError, Deserialize, Deserializer, Serialize, Serializer,
};
pub use std::{
    borrow::Borrow,
    collections::{HashMap, HashSet},
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    time::SystemTime,
};
pub use tch::{
    nn::{self, ConvConfig, Init, OptimizerConfig, VarStore},
    Device, Kind, Reduction, Tensor,
};

pub type Fallible<T> = anyhow::Result<T>;
