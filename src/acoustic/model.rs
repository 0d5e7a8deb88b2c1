//! # wav2vec2 for CTC
//!
//! The phoneme recognizer behind the acoustic scorer, written against candle.
//! Weights are the HuggingFace `Wav2Vec2ForCTC` layout, so any phoneme-level
//! fine-tune of wav2vec2 (base or large, group- or layer-norm feature extractor)
//! loads without conversion.
//!
//! ## Architecture:
//! ```text
//! samples (1, T)
//!   └─ feature extractor: 7 strided 1-D convolutions → (1, C, frames)
//!   └─ feature projection: LayerNorm + Linear       → (1, frames, hidden)
//!   └─ encoder: positional conv + N transformer layers
//!   └─ lm_head: Linear                              → (1, frames, vocab)
//! ```
//! One output frame covers 20ms of 16kHz audio (total conv stride 320).

use candle_core::{Module, Tensor, D};
use candle_nn::{Conv1d, Conv1dConfig, GroupNorm, LayerNorm, Linear, VarBuilder};
use serde::Deserialize;

/// The subset of HuggingFace's `Wav2Vec2Config` the forward pass needs.
#[derive(Debug, Clone, Deserialize)]
pub struct Wav2Vec2Config {
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    pub conv_dim: Vec<usize>,
    pub conv_kernel: Vec<usize>,
    pub conv_stride: Vec<usize>,
    pub num_conv_pos_embeddings: usize,
    pub num_conv_pos_embedding_groups: usize,
    pub vocab_size: usize,
    #[serde(default)]
    pub do_stable_layer_norm: bool,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
    #[serde(default = "default_feat_extract_norm")]
    pub feat_extract_norm: String,
    #[serde(default)]
    pub conv_bias: bool,
}

fn default_layer_norm_eps() -> f64 {
    1e-5
}

fn default_feat_extract_norm() -> String {
    "group".to_string()
}

impl Wav2Vec2Config {
    /// Samples consumed by the convolution stack before it emits its first frame.
    pub fn receptive_field(&self) -> usize {
        let mut field = 1;
        let mut jump = 1;
        for (kernel, stride) in self.conv_kernel.iter().zip(&self.conv_stride) {
            field += (kernel - 1) * jump;
            jump *= stride;
        }
        field
    }
}

enum ConvNorm {
    /// "group" mode: GroupNorm with one group per channel, first layer only
    Group(GroupNorm),
    /// "layer" mode: LayerNorm over channels after every layer
    Layer(LayerNorm),
    None,
}

struct ConvBlock {
    conv: Conv1d,
    norm: ConvNorm,
}

impl ConvBlock {
    fn load(cfg: &Wav2Vec2Config, index: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        let in_channels = if index == 0 { 1 } else { cfg.conv_dim[index - 1] };
        let out_channels = cfg.conv_dim[index];
        let kernel = cfg.conv_kernel[index];
        let conv_cfg = Conv1dConfig {
            stride: cfg.conv_stride[index],
            ..Default::default()
        };
        let conv = if cfg.conv_bias {
            candle_nn::conv1d(in_channels, out_channels, kernel, conv_cfg, vb.pp("conv"))?
        } else {
            candle_nn::conv1d_no_bias(in_channels, out_channels, kernel, conv_cfg, vb.pp("conv"))?
        };

        let norm = match cfg.feat_extract_norm.as_str() {
            "layer" => ConvNorm::Layer(candle_nn::layer_norm(
                out_channels,
                cfg.layer_norm_eps,
                vb.pp("layer_norm"),
            )?),
            "group" if index == 0 => ConvNorm::Group(candle_nn::group_norm(
                out_channels,
                out_channels,
                cfg.layer_norm_eps,
                vb.pp("layer_norm"),
            )?),
            _ => ConvNorm::None,
        };

        Ok(Self { conv, norm })
    }
}

impl Module for ConvBlock {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let xs = self.conv.forward(xs)?;
        let xs = match &self.norm {
            ConvNorm::Group(norm) => norm.forward(&xs)?,
            // LayerNorm works on the last axis, so channels go last and come back.
            ConvNorm::Layer(norm) => norm.forward(&xs.transpose(1, 2)?)?.transpose(1, 2)?,
            ConvNorm::None => xs,
        };
        xs.gelu_erf()
    }
}

/// Positional embedding: a grouped, weight-normalized convolution over time.
struct PositionalConv {
    conv: Conv1d,
    /// Even kernels produce one extra frame that has to be trimmed.
    trim: bool,
}

impl PositionalConv {
    fn load(cfg: &Wav2Vec2Config, vb: VarBuilder) -> candle_core::Result<Self> {
        let kernel = cfg.num_conv_pos_embeddings;
        let groups = cfg.num_conv_pos_embedding_groups;
        let hidden = cfg.hidden_size;
        let conv_cfg = Conv1dConfig {
            padding: kernel / 2,
            groups,
            ..Default::default()
        };
        let vb = vb.pp("conv");
        let weight = weight_norm(&vb, (hidden, hidden / groups, kernel))?;
        let bias = vb.get(hidden, "bias")?;
        Ok(Self {
            conv: Conv1d::new(weight, Some(bias), conv_cfg),
            trim: kernel % 2 == 0,
        })
    }
}

impl Module for PositionalConv {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let frames = xs.dim(1)?;
        let h = self.conv.forward(&xs.transpose(1, 2)?.contiguous()?)?;
        let h = if self.trim { h.narrow(2, 0, frames)? } else { h };
        h.gelu_erf()?.transpose(1, 2)
    }
}

/// Recombine a `weight_norm(dim=2)` convolution weight: `g * v / ||v||`,
/// the norm taken per kernel position. Both the legacy `weight_g`/`weight_v`
/// names and the newer parametrization names are accepted; a plain `weight`
/// is used as-is.
fn weight_norm(vb: &VarBuilder, shape: (usize, usize, usize)) -> candle_core::Result<Tensor> {
    let (out_channels, in_per_group, kernel) = shape;
    let pair = vb
        .get(shape, "weight_v")
        .and_then(|v| Ok((v, vb.get((1, 1, kernel), "weight_g")?)))
        .or_else(|_| {
            let v = vb.get(shape, "parametrizations.weight.original1")?;
            let g = vb.get((1, 1, kernel), "parametrizations.weight.original0")?;
            Ok::<_, candle_core::Error>((v, g))
        });

    match pair {
        Ok((v, g)) => {
            let norm = v
                .sqr()?
                .sum_keepdim(0)?
                .sum_keepdim(1)?
                .sqrt()?;
            v.broadcast_div(&norm)?.broadcast_mul(&g)
        }
        Err(_) => vb.get((out_channels, in_per_group, kernel), "weight"),
    }
}

struct SelfAttention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    out_proj: Linear,
    heads: usize,
    head_dim: usize,
}

impl SelfAttention {
    fn load(cfg: &Wav2Vec2Config, vb: VarBuilder) -> candle_core::Result<Self> {
        let hidden = cfg.hidden_size;
        Ok(Self {
            q_proj: candle_nn::linear(hidden, hidden, vb.pp("q_proj"))?,
            k_proj: candle_nn::linear(hidden, hidden, vb.pp("k_proj"))?,
            v_proj: candle_nn::linear(hidden, hidden, vb.pp("v_proj"))?,
            out_proj: candle_nn::linear(hidden, hidden, vb.pp("out_proj"))?,
            heads: cfg.num_attention_heads,
            head_dim: hidden / cfg.num_attention_heads,
        })
    }

    fn split_heads(&self, xs: Tensor) -> candle_core::Result<Tensor> {
        let (batch, frames, _) = xs.dims3()?;
        xs.reshape((batch, frames, self.heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }
}

impl Module for SelfAttention {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let (batch, frames, hidden) = xs.dims3()?;
        let scale = (self.head_dim as f64).powf(-0.5);

        let q = self.split_heads((self.q_proj.forward(xs)? * scale)?)?;
        let k = self.split_heads(self.k_proj.forward(xs)?)?;
        let v = self.split_heads(self.v_proj.forward(xs)?)?;

        let weights = q.matmul(&k.transpose(2, 3)?.contiguous()?)?;
        let weights = candle_nn::ops::softmax_last_dim(&weights)?;
        let context = weights
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((batch, frames, hidden))?;
        self.out_proj.forward(&context)
    }
}

struct EncoderLayer {
    attention: SelfAttention,
    layer_norm: LayerNorm,
    intermediate_dense: Linear,
    output_dense: Linear,
    final_layer_norm: LayerNorm,
    pre_norm: bool,
}

impl EncoderLayer {
    fn load(cfg: &Wav2Vec2Config, vb: VarBuilder) -> candle_core::Result<Self> {
        let hidden = cfg.hidden_size;
        let eps = cfg.layer_norm_eps;
        let ff = vb.pp("feed_forward");
        Ok(Self {
            attention: SelfAttention::load(cfg, vb.pp("attention"))?,
            layer_norm: candle_nn::layer_norm(hidden, eps, vb.pp("layer_norm"))?,
            intermediate_dense: candle_nn::linear(
                hidden,
                cfg.intermediate_size,
                ff.pp("intermediate_dense"),
            )?,
            output_dense: candle_nn::linear(cfg.intermediate_size, hidden, ff.pp("output_dense"))?,
            final_layer_norm: candle_nn::layer_norm(hidden, eps, vb.pp("final_layer_norm"))?,
            pre_norm: cfg.do_stable_layer_norm,
        })
    }

    fn feed_forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let h = self.intermediate_dense.forward(xs)?.gelu_erf()?;
        self.output_dense.forward(&h)
    }
}

impl Module for EncoderLayer {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        if self.pre_norm {
            let h = (xs + self.attention.forward(&self.layer_norm.forward(xs)?)?)?;
            &h + self.feed_forward(&self.final_layer_norm.forward(&h)?)?
        } else {
            let h = self.layer_norm.forward(&(xs + self.attention.forward(xs)?)?)?;
            self.final_layer_norm.forward(&(&h + self.feed_forward(&h)?)?)
        }
    }
}

struct Encoder {
    positional: PositionalConv,
    layer_norm: LayerNorm,
    layers: Vec<EncoderLayer>,
    pre_norm: bool,
}

impl Encoder {
    fn load(cfg: &Wav2Vec2Config, vb: VarBuilder) -> candle_core::Result<Self> {
        let layers = (0..cfg.num_hidden_layers)
            .map(|i| EncoderLayer::load(cfg, vb.pp(format!("layers.{i}"))))
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Self {
            positional: PositionalConv::load(cfg, vb.pp("pos_conv_embed"))?,
            layer_norm: candle_nn::layer_norm(cfg.hidden_size, cfg.layer_norm_eps, vb.pp("layer_norm"))?,
            layers,
            pre_norm: cfg.do_stable_layer_norm,
        })
    }
}

impl Module for Encoder {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let mut h = (xs + self.positional.forward(xs)?)?;
        // Post-norm models normalize before the stack, pre-norm models after it.
        if !self.pre_norm {
            h = self.layer_norm.forward(&h)?;
        }
        for layer in &self.layers {
            h = layer.forward(&h)?;
        }
        if self.pre_norm {
            h = self.layer_norm.forward(&h)?;
        }
        Ok(h)
    }
}

/// Full CTC model: raw samples in, per-frame vocabulary logits out.
pub struct Wav2Vec2ForCtc {
    conv_layers: Vec<ConvBlock>,
    projection_norm: LayerNorm,
    projection: Linear,
    encoder: Encoder,
    lm_head: Linear,
}

impl Wav2Vec2ForCtc {
    pub fn load(cfg: &Wav2Vec2Config, vb: VarBuilder) -> candle_core::Result<Self> {
        let body = vb.pp("wav2vec2");
        let extractor = body.pp("feature_extractor");
        let conv_layers = (0..cfg.conv_dim.len())
            .map(|i| ConvBlock::load(cfg, i, extractor.pp(format!("conv_layers.{i}"))))
            .collect::<candle_core::Result<Vec<_>>>()?;

        let extracted = cfg.conv_dim.last().copied().unwrap_or(cfg.hidden_size);
        let projection = body.pp("feature_projection");

        Ok(Self {
            conv_layers,
            projection_norm: candle_nn::layer_norm(
                extracted,
                cfg.layer_norm_eps,
                projection.pp("layer_norm"),
            )?,
            projection: candle_nn::linear(extracted, cfg.hidden_size, projection.pp("projection"))?,
            encoder: Encoder::load(cfg, body.pp("encoder"))?,
            lm_head: candle_nn::linear(cfg.hidden_size, cfg.vocab_size, vb.pp("lm_head"))?,
        })
    }
}

impl Module for Wav2Vec2ForCtc {
    /// `samples`: (batch, time) normalized audio. Returns (batch, frames, vocab) logits.
    fn forward(&self, samples: &Tensor) -> candle_core::Result<Tensor> {
        let mut h = samples.unsqueeze(1)?;
        for layer in &self.conv_layers {
            h = layer.forward(&h)?;
        }
        let h = h.transpose(1, 2)?.contiguous()?;
        let h = self.projection.forward(&self.projection_norm.forward(&h)?)?;
        let h = self.encoder.forward(&h)?;
        self.lm_head.forward(&h)
    }
}

/// Zero-mean, unit-variance normalization applied by the wav2vec2 feature extractor.
pub fn normalize_samples(samples: &[f32]) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }
    let n = samples.len() as f32;
    let mean = samples.iter().sum::<f32>() / n;
    let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f32>() / n;
    let std = (variance + 1e-7).sqrt();
    samples.iter().map(|s| (s - mean) / std).collect()
}

/// Log-softmax over the vocabulary axis of a (frames, vocab) logits tensor.
pub fn log_probs(logits: &Tensor) -> candle_core::Result<Vec<Vec<f32>>> {
    candle_nn::ops::log_softmax(logits, D::Minus1)?
        .to_dtype(candle_core::DType::F32)?
        .to_vec2::<f32>()
}
