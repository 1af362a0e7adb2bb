//! Kubernetes resource quantity syntax (`500m`, `2`, `4Gi`, `1e3`).
//!
//! `k8s_openapi::Quantity` is an opaque string, so nothing stops an invalid
//! value from reaching the API server. We check the grammar before building
//! anything that embeds one.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use once_cell::sync::Lazy;
use regex::Regex;

static QUANTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[+-]?(?:[0-9]+(?:\.[0-9]*)?|\.[0-9]+)(?:[eE][+-]?[0-9]+|Ki|Mi|Gi|Ti|Pi|Ei|n|u|m|k|M|G|T|P|E)?$",
    )
    .expect("quantity pattern compiles")
});

/// Returns the value as a [`Quantity`] when it matches the quantity grammar.
pub fn parse(raw: &str) -> Option<Quantity> {
    let trimmed = raw.trim();
    QUANTITY
        .is_match(trimmed)
        .then(|| Quantity(trimmed.to_string()))
}
