use tch::{nn, Tensor};

use crate::config::{DatasetFamily, RunConfig};

/// Generator (or encoder/decoder) network. Point data uses a dense MLP,
/// images the transposed-convolution stack.
#[derive(Debug)]
pub struct Generator {
    net: nn::SequentialT,
    conv: bool,
}

impl Generator {
    pub fn dense(path: nn::Path, dim_in: i64, dim_out: i64) -> Generator {
        let dim_hidden = 128;
        let net = nn::seq_t()
            .add(nn::linear(&path / "Linear_1", dim_in, dim_hidden, Default::default()))
            .add_fn(|x| x.leaky_relu())
            .add(nn::linear(&path / "Linear_2", dim_hidden, dim_hidden, Default::default()))
            .add_fn(|x| x.leaky_relu())
            .add(nn::linear(&path / "Linear_3", dim_hidden, dim_out, Default::default()));
        Generator { net, conv: false }
    }

    /// Maps `[B, dim_in]` noise to `[B, 3, 64, 64]` images in [0, 1].
    pub fn conv(path: nn::Path, dim_in: i64) -> Generator {
        let dim_hidden = 512;
        let net = nn::seq_t()
            .add(nn::conv_transpose2d(&path / "ConvTranspose2d_1", dim_in, dim_hidden,
                                        4, nn::ConvTransposeConfig { stride: 1, padding: 0, dilation: 1, ..Default::default() }))
            .add(nn::batch_norm2d(&path / "batch_norm2d_1", dim_hidden, Default::default()))
            .add_fn(|x| x.relu())
            .add(nn::conv_transpose2d(&path / "ConvTranspose2d_2", dim_hidden, dim_hidden / 2,
                                        4, nn::ConvTransposeConfig { stride: 2, padding: 1, dilation: 1, ..Default::default() }))
            .add(nn::batch_norm2d(&path / "batch_norm2d_2", dim_hidden / 2, Default::default()))
            .add_fn(|x| x.relu())
            .add(nn::conv_transpose2d(&path / "ConvTranspose2d_3", dim_hidden / 2, dim_hidden / 4,
                                        4, nn::ConvTransposeConfig { stride: 2, padding: 1, dilation: 1, ..Default::default() }))
            .add(nn::batch_norm2d(&path / "batch_norm2d_3", dim_hidden / 4, Default::default()))
            .add_fn(|x| x.relu())
            .add(nn::conv_transpose2d(&path / "ConvTranspose2d_4", dim_hidden / 4, 3,
                                        4, nn::ConvTransposeConfig { stride: 2, padding: 1, dilation: 1, ..Default::default() }))
            .add_fn(|x| x.sigmoid());
        Generator { net, conv: true }
    }
}

/// Network builders for one dataset family, resolved once at setup.
#[derive(Clone, Copy)]
pub struct Builders {
    /// WGAN generator: noise to samples.
    pub generator: fn(nn::Path, &RunConfig) -> Generator,
    /// WAE encoder: samples to latent codes.
    pub encoder: fn(nn::Path, &RunConfig) -> Generator,
    /// WAE decoder: latent codes to samples.
    pub decoder: fn(nn::Path, &RunConfig) -> Generator,
}

pub fn builders(dataset: &DatasetFamily) -> Builders {
    match dataset {
        DatasetFamily::Images { .. } => Builders {
            generator: |p, c| Generator::conv(p, c.noise_dims),
            encoder: |p, c| Generator::dense(p, c.dataset.sample_dims(), c.latent_dims),
            decoder: |p, c| Generator::conv(p, c.latent_dims),
        },
        _ => Builders {
            generator: |p, c| Generator::dense(p, c.noise_dims, c.dataset.sample_dims()),
            encoder: |p, c| Generator::dense(p, c.dataset.sample_dims(), c.latent_dims),
            decoder: |p, c| Generator::dense(p, c.latent_dims, c.dataset.sample_dims()),
        },
    }
}

impl nn::ModuleT for Generator {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        if self.conv {
            let batch = xs.size()[0];
            self.net.forward_t(&xs.reshape([batch, -1, 1, 1]), train)
        } else {
            self.net.forward_t(&xs.flatten(1, -1), train)
        }
    }
}
