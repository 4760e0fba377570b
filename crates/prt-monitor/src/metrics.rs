//! Prometheus recorder and counter descriptions

use ::metrics::{describe_counter, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub const TOKENS_OBSERVED: &str = "prt_tokens_observed_total";
pub const TOKENS_FAILED: &str = "prt_tokens_failed_total";
pub const TOKENS_DECRYPTED: &str = "prt_tokens_decrypted_total";
pub const HMAC_INVALID: &str = "prt_hmac_invalid_total";

/// Install the global recorder and return the handle used to render it.
///
/// Only one recorder may be installed per process.
pub fn init_prometheus_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe();
    Ok(handle)
}

fn describe() {
    describe_counter!(TOKENS_OBSERVED, Unit::Count, "PRT headers handed to the pipeline");
    describe_counter!(TOKENS_FAILED, Unit::Count, "Tokens dropped, by failing stage");
    describe_counter!(TOKENS_DECRYPTED, Unit::Count, "Tokens decrypted and extracted");
    describe_counter!(HMAC_INVALID, Unit::Count, "Extracted tokens whose HMAC did not verify");
    describe_counter!(
        "prt_key_fetches_total",
        Unit::Count,
        "Key document fetches, by outcome"
    );
    describe_counter!(
        "prt_domain_list_refresh_total",
        Unit::Count,
        "Domain list refreshes, by outcome"
    );
}
