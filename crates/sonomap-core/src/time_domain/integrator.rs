//! Sector integration of streamed maps

use crate::cache::ContentHasher;
use crate::grid::Grid;
use crate::sector::Region;
use crate::source::{BlockSource, SampleBlock};
use crate::types::{BeamError, BeamResult};

/// Sums a stream of maps over sectors
///
/// The input channels are grid points, e.g. the squared output of a
/// [`super::TimeBeamformer`]. Within each block, values at or below
/// `clip` dB relative to the block maximum are zeroed before summation.
/// The output has one channel per sector.
pub struct SectorIntegrator {
    source: Box<dyn BlockSource>,
    indices: Vec<Vec<usize>>,
    /// Dynamic range in dB, negative
    clip: f64,
}

impl std::fmt::Debug for SectorIntegrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SectorIntegrator")
            .field("sectors", &self.indices.len())
            .field("clip", &self.clip)
            .finish()
    }
}

impl SectorIntegrator {
    pub fn new(source: Box<dyn BlockSource>, grid: &dyn Grid, regions: &[&dyn Region]) -> BeamResult<Self> {
        if source.channel_count() != grid.size() {
            return Err(BeamError::shape("integrator channels", grid.size(), source.channel_count()));
        }
        if regions.is_empty() {
            return Err(BeamError::config("sector integration needs at least one sector"));
        }
        let indices: Vec<Vec<usize>> = regions.iter().map(|r| grid.subdomain(*r)).collect();
        tracing::debug!(
            sectors = indices.len(),
            points = ?indices.iter().map(Vec::len).collect::<Vec<_>>(),
            "sector integrator prepared"
        );
        Ok(Self {
            source,
            indices,
            clip: -350.0,
        })
    }

    pub fn clip(mut self, clip: f64) -> BeamResult<Self> {
        if clip.is_nan() || clip > 0.0 {
            return Err(BeamError::config(format!("clip must be a non-positive level in dB, got {}", clip)));
        }
        self.clip = clip;
        Ok(self)
    }

    /// Grid indices of each sector.
    pub fn indices(&self) -> &[Vec<usize>] {
        &self.indices
    }
}

impl BlockSource for SectorIntegrator {
    fn sample_rate(&self) -> f64 {
        self.source.sample_rate()
    }

    fn channel_count(&self) -> usize {
        self.indices.len()
    }

    fn num_samples(&self) -> Option<usize> {
        self.source.num_samples()
    }

    fn next_block(&mut self, max_len: usize) -> BeamResult<Option<SampleBlock>> {
        let Some(block) = self.source.next_block(max_len)? else {
            return Ok(None);
        };
        let r_max = block.as_slice().iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let r_min = r_max * 10f64.powf(self.clip / 10.0);
        let mut out = Vec::with_capacity(block.len() * self.indices.len());
        for i in 0..block.len() {
            let frame = block.frame(i);
            for sector in &self.indices {
                out.push(sector.iter().map(|&g| frame[g]).filter(|v| *v > r_min).sum::<f64>());
            }
        }
        SampleBlock::new(out, self.indices.len()).map(Some)
    }

    fn reset(&mut self) -> BeamResult<()> {
        self.source.reset()
    }

    fn digest(&self) -> String {
        ContentHasher::new("SectorIntegrator")
            .field("source", &self.source.digest())
            .field("indices", &self.indices)
            .field("clip", &self.clip)
            .finish()
    }
}
