use llama_cpp_2::sampling::LlamaSampler;
use log::debug;

use crate::config::DecodingConfig;

/// llama.cpp's "pick a random seed" value.
pub const RANDOM_SEED: u32 = u32::MAX;

pub(crate) fn sampler_seed(config: &DecodingConfig) -> u32 {
    config.seed.unwrap_or(RANDOM_SEED)
}

/// Build the sampler chain for the fixed decoding configuration.
///
/// A temperature of zero (or below) means greedy decoding.
pub(crate) fn create_sampler(config: &DecodingConfig) -> LlamaSampler {
    if config.temperature <= 0.0 {
        debug!("Using Greedy sampler");
        return LlamaSampler::greedy();
    }

    let seed = sampler_seed(config);
    debug!(
        "Using temp={} top_p={} seed={seed}",
        config.temperature, config.top_p
    );
    LlamaSampler::chain_simple([
        LlamaSampler::temp(config.temperature),
        LlamaSampler::top_p(config.top_p, 1),
        LlamaSampler::dist(seed),
    ])
}
