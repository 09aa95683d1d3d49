//! Spectrally normalized layers.
//!
//! Each layer keeps a running estimate of the leading singular vectors of its
//! weight matrix as non-trainable variables. A training-mode forward pass
//! refines the estimate with one power iteration; the weight is then divided
//! by `σ = uᵀ W v` before it is applied.

use crate::{common::*, params};

#[derive(Debug)]
pub struct SpectralNorm {
    u: Tensor,
    v: Tensor,
    eps: f64,
}

impl SpectralNorm {
    /// `rows` is the output dimension of the layer, `cols` the product of the remaining ones.
    pub fn new<'p, P>(path: P, rows: i64, cols: i64) -> SpectralNorm
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let device = path.device();
        let eps = params::SPECTRAL_NORM_EPS;

        let mut u = path.zeros_no_train("sn_u", &[rows]);
        let mut v = path.zeros_no_train("sn_v", &[cols]);
        tch::no_grad(|| {
            u.copy_(&normalize(&Tensor::randn(&[rows], (Kind::Float, device)), eps));
            v.copy_(&normalize(&Tensor::randn(&[cols], (Kind::Float, device)), eps));
        });

        SpectralNorm { u, v, eps }
    }

    /// Returns `weight / σ(weight_mat)` where `weight_mat` is `weight` reshaped to `(rows, cols)`.
    pub fn normalize_weight(&self, weight_mat: &Tensor, weight: &Tensor, train: bool) -> Tensor {
        let (u, v) = if train {
            let (u, v) = tch::no_grad(|| {
                let v = normalize(&weight_mat.tr().mv(&self.u), self.eps);
                let u = normalize(&weight_mat.mv(&v), self.eps);
                (u, v)
            });

            let mut u_buf = self.u.shallow_clone();
            let mut v_buf = self.v.shallow_clone();
            tch::no_grad(|| {
                u_buf.copy_(&u);
                v_buf.copy_(&v);
            });

            // the autograd graph keeps its own copies so later refinements
            // of the buffers do not invalidate it
            (u, v)
        } else {
            (self.u.detach().copy(), self.v.detach().copy())
        };

        let sigma = u.dot(&weight_mat.mv(&v));
        weight / sigma
    }
}

fn normalize(xs: &Tensor, eps: f64) -> Tensor {
    xs / (xs.norm() + eps)
}

#[derive(Debug)]
pub struct SnLinear {
    ws: Tensor,
    bs: Tensor,
    norm: SpectralNorm,
}

impl SnLinear {
    pub fn new<'p, P>(path: P, in_dim: i64, out_dim: i64) -> SnLinear
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let bound = 1.0 / (in_dim as f64).sqrt();

        let ws = path.var("weight", &[out_dim, in_dim], Init::KaimingUniform);
        let bs = path.var(
            "bias",
            &[out_dim],
            Init::Uniform {
                lo: -bound,
                up: bound,
            },
        );
        let norm = SpectralNorm::new(path, out_dim, in_dim);

        SnLinear { ws, bs, norm }
    }

    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let ws = self.norm.normalize_weight(&self.ws, &self.ws, train);
        xs.matmul(&ws.tr()) + &self.bs
    }
}

#[derive(Debug)]
pub struct SnConv2D {
    ws: Tensor,
    bs: Tensor,
    stride: i64,
    padding: i64,
    norm: SpectralNorm,
}

impl SnConv2D {
    pub fn new<'p, P>(
        path: P,
        in_channels: i64,
        out_channels: i64,
        kernel_size: i64,
        stride: i64,
        padding: i64,
    ) -> SnConv2D
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let fan_in = in_channels * kernel_size * kernel_size;
        let bound = 1.0 / (fan_in as f64).sqrt();

        let ws = path.var(
            "weight",
            &[out_channels, in_channels, kernel_size, kernel_size],
            Init::KaimingUniform,
        );
        let bs = path.var(
            "bias",
            &[out_channels],
            Init::Uniform {
                lo: -bound,
                up: bound,
            },
        );
        let norm = SpectralNorm::new(path, out_channels, fan_in);

        SnConv2D {
            ws,
            bs,
            stride,
            padding,
            norm,
        }
    }

    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let out_channels = self.ws.size()[0];
        let weight_mat = self.ws.view([out_channels, -1]);
        let ws = self.norm.normalize_weight(&weight_mat, &self.ws, train);
        xs.conv2d(
            &ws,
            Some(&self.bs),
            &[self.stride, self.stride],
            &[self.padding, self.padding],
            &[1, 1],
            1,
        )
    }
}

/// Transposed convolution; the weight is laid out `(in, out, k, k)`, so the
/// normalization runs over its second axis.
#[derive(Debug)]
pub struct SnConvTranspose2D {
    ws: Tensor,
    bs: Tensor,
    stride: i64,
    padding: i64,
    norm: SpectralNorm,
}

impl SnConvTranspose2D {
    pub fn new<'p, P>(
        path: P,
        in_channels: i64,
        out_channels: i64,
        kernel_size: i64,
        stride: i64,
        padding: i64,
    ) -> SnConvTranspose2D
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let fan_in = out_channels * kernel_size * kernel_size;
        let bound = 1.0 / (fan_in as f64).sqrt();

        let ws = path.var(
            "weight",
            &[in_channels, out_channels, kernel_size, kernel_size],
            Init::KaimingUniform,
        );
        let bs = path.var(
            "bias",
            &[out_channels],
            Init::Uniform {
                lo: -bound,
                up: bound,
            },
        );
        let norm = SpectralNorm::new(path, out_channels, in_channels * kernel_size * kernel_size);

        SnConvTranspose2D {
            ws,
            bs,
            stride,
            padding,
            norm,
        }
    }

    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let out_channels = self.ws.size()[1];
        let weight_mat = self.ws.transpose(0, 1).contiguous().view([out_channels, -1]);
        let ws = self.norm.normalize_weight(&weight_mat, &self.ws, train);
        xs.conv_transpose2d(
            &ws,
            Some(&self.bs),
            &[self.stride, self.stride],
            &[self.padding, self.padding],
            &[0, 0],
            1,
            &[1, 1],
        )
    }
}
