//! Training batches.
//!
//! Batches are validated when they are built so that a malformed sample is
//! reported where it enters the pipeline rather than as a NaN loss later on.
use crate::error::Error;
use crate::models::text2pal::PALETTE_LEN;
use tch::{Device, Kind, Tensor};

/// A batch of padded word embeddings and the palettes they describe.
#[derive(Debug)]
pub struct TextPaletteBatch {
    /// `(batch, seq_len, embed_dim)`, padding rows are all zeros.
    pub embeddings: Tensor,
    /// `(batch, 15)` real palettes.
    pub palettes: Tensor,
    /// `(batch, seq_len)`, true on the non-padding rows.
    pub mask: Tensor,
    /// `(batch,)` number of non-padding rows of each sample.
    pub lengths: Tensor,
}

/// Marks the rows of `(batch, seq_len, embed_dim)` embeddings holding at
/// least one non-zero value.
pub fn non_zero_rows(embeddings: &Tensor) -> Tensor {
    embeddings.ne(0.).any_dim(-1, false)
}

impl TextPaletteBatch {
    pub fn new(embeddings: Tensor, palettes: Tensor) -> anyhow::Result<Self> {
        let (bsize, _seq_len, _embed_dim) = embeddings.size3()?;
        let palettes = palettes.to_kind(Kind::Float);
        if palettes.size() != [bsize, PALETTE_LEN] {
            return Err(Error::ShapeMismatch {
                context: "real palettes",
                lhs: palettes.size(),
                rhs: vec![bsize, PALETTE_LEN],
            }
            .into());
        }
        let mask = non_zero_rows(&embeddings);
        let lengths = mask.sum_dim_intlist([-1].as_slice(), false, Kind::Int64);
        let per_sample = Vec::<i64>::try_from(&lengths)?;
        if let Some(index) = per_sample.iter().position(|&len| len == 0) {
            return Err(Error::EmptySample { index }.into());
        }
        Ok(Self { embeddings: embeddings.to_kind(Kind::Float), palettes, mask, lengths })
    }

    pub fn batch_size(&self) -> i64 {
        self.palettes.size()[0]
    }

    pub fn input_lengths(&self) -> anyhow::Result<Vec<i64>> {
        Ok(Vec::<i64>::try_from(&self.lengths)?)
    }

    pub fn to_device(&self, device: Device) -> Self {
        Self {
            embeddings: self.embeddings.to_device(device),
            palettes: self.palettes.to_device(device),
            mask: self.mask.to_device(device),
            lengths: self.lengths.to_device(device),
        }
    }
}

/// A batch for the colorization networks. `side_signal` feeds the generator
/// injectors and `palette` conditions the discriminator.
#[derive(Debug)]
pub struct ColorizationBatch {
    /// `(batch, 1, size, size)` luminance.
    pub luminance: Tensor,
    /// `(batch, 2, size, size)` target chrominance.
    pub chrominance: Tensor,
    /// `(batch, 11)` or `(batch, 16)`.
    pub side_signal: Tensor,
    /// `(batch, 10)` or `(batch, 15)`.
    pub palette: Tensor,
}

impl ColorizationBatch {
    pub fn new(
        luminance: Tensor,
        chrominance: Tensor,
        side_signal: Tensor,
        palette: Tensor,
    ) -> anyhow::Result<Self> {
        let (bsize, _, h, w) = luminance.size4()?;
        if chrominance.size() != [bsize, 2, h, w] {
            return Err(Error::ShapeMismatch {
                context: "target chrominance",
                lhs: chrominance.size(),
                rhs: vec![bsize, 2, h, w],
            }
            .into());
        }
        for (context, tensor) in [("side signal", &side_signal), ("palette", &palette)] {
            if tensor.size().first() != Some(&bsize) {
                return Err(Error::ShapeMismatch {
                    context,
                    lhs: tensor.size(),
                    rhs: vec![bsize, -1],
                }
                .into());
            }
        }
        Ok(Self { luminance, chrominance, side_signal, palette })
    }

    pub fn batch_size(&self) -> i64 {
        self.luminance.size()[0]
    }

    pub fn to_device(&self, device: Device) -> Self {
        Self {
            luminance: self.luminance.to_device(device),
            chrominance: self.chrominance.to_device(device),
            side_signal: self.side_signal.to_device(device),
            palette: self.palette.to_device(device),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_non_zero_rows() {
        let embeddings = Tensor::zeros([3, 4, 2], (Kind::Float, Device::Cpu));
        let _ = embeddings.get(0).get(0).fill_(1.);
        let _ = embeddings.get(1).narrow(0, 0, 3).fill_(-2.);
        // A padding row in the middle does not count.
        let _ = embeddings.get(2).get(0).fill_(1.);
        let _ = embeddings.get(2).get(3).get(1).fill_(0.5);
        let palettes = Tensor::rand([3, 15], (Kind::Float, Device::Cpu));
        let batch = TextPaletteBatch::new(embeddings, palettes).unwrap();
        assert_eq!(batch.input_lengths().unwrap(), [1, 3, 2]);
        let mask = Vec::<i64>::try_from(batch.mask.get(2).to_kind(Kind::Int64)).unwrap();
        assert_eq!(mask, [1, 0, 0, 1]);
    }

    #[test]
    fn rejects_empty_samples() {
        let embeddings = Tensor::ones([3, 4, 2], (Kind::Float, Device::Cpu));
        let _ = embeddings.get(1).fill_(0.);
        let palettes = Tensor::rand([3, 15], (Kind::Float, Device::Cpu));
        let err = TextPaletteBatch::new(embeddings, palettes).unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::EmptySample { index: 1 })));
    }

    #[test]
    fn rejects_bad_palettes() {
        let embeddings = Tensor::ones([2, 4, 2], (Kind::Float, Device::Cpu));
        let palettes = Tensor::rand([2, 12], (Kind::Float, Device::Cpu));
        assert!(TextPaletteBatch::new(embeddings, palettes).is_err());
    }

    #[test]
    fn colorization_shapes() {
        let opts = (Kind::Float, Device::Cpu);
        let batch = ColorizationBatch::new(
            Tensor::rand([2, 1, 64, 64], opts),
            Tensor::rand([2, 2, 64, 64], opts),
            Tensor::rand([2, 11], opts),
            Tensor::rand([2, 10], opts),
        )
        .unwrap();
        assert_eq!(batch.batch_size(), 2);
        assert!(ColorizationBatch::new(
            Tensor::rand([2, 1, 64, 64], opts),
            Tensor::rand([2, 2, 32, 32], opts),
            Tensor::rand([2, 11], opts),
            Tensor::rand([2, 10], opts),
        )
        .is_err());
        assert!(ColorizationBatch::new(
            Tensor::rand([2, 1, 64, 64], opts),
            Tensor::rand([2, 2, 64, 64], opts),
            Tensor::rand([3, 11], opts),
            Tensor::rand([2, 10], opts),
        )
        .is_err());
    }
}
