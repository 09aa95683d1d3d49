use crate::{common::*, params};

/// Picks a weighting over the palette channels for one output color.
#[derive(Debug)]
pub struct ColorPalette {
    fc1: nn::Linear,
    bn1: nn::BatchNorm,
    fc2: nn::Linear,
    bn2: nn::BatchNorm,
    fc3: nn::Linear,
}

impl ColorPalette {
    pub fn new<'p, P>(path: P, input_dim: i64, palette_channels: i64) -> ColorPalette
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let hidden_1 = params::PALETTE_HIDDEN_1;
        let hidden_2 = params::PALETTE_HIDDEN_2;

        let fc1 = nn::linear(path / "fc1", input_dim, hidden_1, Default::default());
        let bn1 = nn::batch_norm1d(path / "bn1", hidden_1, Default::default());
        let fc2 = nn::linear(path / "fc2", hidden_1, hidden_2, Default::default());
        let bn2 = nn::batch_norm1d(path / "bn2", hidden_2, Default::default());
        let fc3 = nn::linear(path / "fc3", hidden_2, palette_channels, Default::default());

        ColorPalette {
            fc1,
            bn1,
            fc2,
            bn2,
            fc3,
        }
    }

    /// Returns a `(batch, palette_channels)` weighting in `(-1, 1)`.
    pub fn forward_t(&self, features: &Tensor, train: bool) -> Tensor {
        features
            .apply(&self.fc1)
            .apply_t(&self.bn1, train)
            .relu()
            .apply(&self.fc2)
            .apply_t(&self.bn2, train)
            .relu()
            .apply(&self.fc3)
            .tanh()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_are_bounded() {
        let vs = VarStore::new(Device::Cpu);
        let palette = ColorPalette::new(vs.root() / "palette", 32, 6);
        let features = Tensor::randn(&[5, 32], (Kind::Float, Device::Cpu)) * 100.0;

        let weights = palette.forward_t(&features, true);
        assert_eq!(weights.size(), vec![5, 6]);
        assert!(weights.abs().max().double_value(&[]) <= 1.0);
    }
}
