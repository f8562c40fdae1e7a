//! Capability strings advertised in `HELO`.

use crate::config::PlayerConfig;
use crate::pipeline::DecodePipeline;

/// Prefix of the sync-group capability carried across a server switch.
pub const SYNC_CAP: &str = ",SyncgroupID=";

/// Build the per-player fixed capability suffix:
/// `,MaxSampleRate=<rate>,<codec,codec,...>`.
///
/// The configured codec list is filtered down to what the decoder can
/// actually open, except in `thru` mode where nothing is decoded locally
/// and the list passes through as-is.
pub fn fixed_cap(config: &PlayerConfig, decoder: &dyn DecodePipeline) -> String {
    let codecs: Vec<&str> = if config.mode.to_ascii_lowercase().contains("thru") {
        config.codecs.split(',').map(str::trim).collect()
    } else {
        config
            .codecs
            .split(',')
            .map(str::trim)
            .filter(|c| decoder.supports(c))
            .collect()
    };

    format!(",MaxSampleRate={},{}", config.sample_rate, codecs.join(","))
}

/// Compose the variable capability for a sync-group id received in `serv`.
pub fn sync_group_cap(id: &str) -> String {
    format!("{}{}", SYNC_CAP, id)
}
