//! Block sources: the narrow interface to multichannel time data
//!
//! Everything upstream of the CSM estimator (file readers, sound cards,
//! simulators) is consumed through [`BlockSource`]. Blocks are yielded in
//! stream order as `[length × channels]` row-major sample arrays.
//!
//! ```rust
//! use sonomap_core::source::{BlockSource, MemorySource};
//!
//! // two channels, three samples
//! let mut src = MemorySource::from_channels(vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]], 48_000.0).unwrap();
//! let block = src.next_block(2).unwrap().unwrap();
//! assert_eq!(block.len(), 2);
//! assert_eq!(block.frame(1), &[2.0, 5.0]);
//! ```

use crate::cache::ContentHasher;
use crate::types::{BeamError, BeamResult};

/// A chunk of multichannel samples, `[len × channels]` row-major
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBlock {
    data: Vec<f64>,
    channels: usize,
}

impl SampleBlock {
    pub fn new(data: Vec<f64>, channels: usize) -> BeamResult<Self> {
        if channels == 0 {
            return Err(BeamError::config("sample block needs at least one channel"));
        }
        if data.len() % channels != 0 {
            return Err(BeamError::shape(
                "sample block",
                data.len() - data.len() % channels,
                data.len(),
            ));
        }
        Ok(Self { data, channels })
    }

    /// Number of samples per channel
    pub fn len(&self) -> usize {
        self.data.len() / self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// All channels at one time index
    pub fn frame(&self, i: usize) -> &[f64] {
        &self.data[i * self.channels..(i + 1) * self.channels]
    }

    pub fn sample(&self, i: usize, channel: usize) -> f64 {
        self.data[i * self.channels + channel]
    }

    /// Copy of one channel
    pub fn channel(&self, channel: usize) -> Vec<f64> {
        self.data
            .iter()
            .skip(channel)
            .step_by(self.channels)
            .copied()
            .collect()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.data
    }
}

/// Producer of multichannel sample blocks
pub trait BlockSource: Send {
    /// Sample rate in Hz
    fn sample_rate(&self) -> f64;

    /// Number of channels in every block
    fn channel_count(&self) -> usize;

    /// Total samples per channel, when known up front
    fn num_samples(&self) -> Option<usize>;

    /// Next block of at most `max_len` samples; `None` once exhausted.
    fn next_block(&mut self, max_len: usize) -> BeamResult<Option<SampleBlock>>;

    /// Rewind to the first sample.
    fn reset(&mut self) -> BeamResult<()>;

    /// Content digest identifying the stream for caching.
    fn digest(&self) -> String;
}

/// Read every remaining block into per-channel buffers.
pub fn read_channels(source: &mut dyn BlockSource, block_len: usize) -> BeamResult<Vec<Vec<f64>>> {
    let channels = source.channel_count();
    let mut out = vec![Vec::with_capacity(source.num_samples().unwrap_or(0)); channels];
    while let Some(block) = source.next_block(block_len.max(1))? {
        if block.channels() != channels {
            return Err(BeamError::shape("block source", channels, block.channels()));
        }
        for i in 0..block.len() {
            for (ch, v) in block.frame(i).iter().enumerate() {
                out[ch].push(*v);
            }
        }
    }
    Ok(out)
}

/// In-memory multichannel signal
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Vec<f64>,
    channels: usize,
    sample_rate: f64,
    position: usize,
    digest: String,
}

impl MemorySource {
    /// From interleaved `[len × channels]` data.
    pub fn new(data: Vec<f64>, channels: usize, sample_rate: f64) -> BeamResult<Self> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(BeamError::config(format!(
                "sample rate must be positive, got {}",
                sample_rate
            )));
        }
        // validates the channel layout
        let block = SampleBlock::new(data, channels)?;
        let data = block.into_inner();
        let digest = ContentHasher::new("MemorySource")
            .field("channels", &channels)
            .field("sample_rate", &sample_rate)
            .field("data", &data)
            .finish();
        Ok(Self {
            data,
            channels,
            sample_rate,
            position: 0,
            digest,
        })
    }

    /// From one vector per channel; all channels must have equal length.
    pub fn from_channels(channels: Vec<Vec<f64>>, sample_rate: f64) -> BeamResult<Self> {
        let n_ch = channels.len();
        let len = channels.first().map(|c| c.len()).unwrap_or(0);
        if let Some(bad) = channels.iter().find(|c| c.len() != len) {
            return Err(BeamError::shape("channel length", len, bad.len()));
        }
        let mut data = Vec::with_capacity(n_ch * len);
        for i in 0..len {
            for ch in &channels {
                data.push(ch[i]);
            }
        }
        Self::new(data, n_ch, sample_rate)
    }
}

impl BlockSource for MemorySource {
    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn channel_count(&self) -> usize {
        self.channels
    }

    fn num_samples(&self) -> Option<usize> {
        Some(self.data.len() / self.channels)
    }

    fn next_block(&mut self, max_len: usize) -> BeamResult<Option<SampleBlock>> {
        let total = self.data.len() / self.channels;
        if self.position >= total || max_len == 0 {
            return Ok(None);
        }
        let n = max_len.min(total - self.position);
        let start = self.position * self.channels;
        let block = SampleBlock::new(
            self.data[start..start + n * self.channels].to_vec(),
            self.channels,
        )?;
        self.position += n;
        Ok(Some(block))
    }

    fn reset(&mut self) -> BeamResult<()> {
        self.position = 0;
        Ok(())
    }

    fn digest(&self) -> String {
        self.digest.clone()
    }
}
