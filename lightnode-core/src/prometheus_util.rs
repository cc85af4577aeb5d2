// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! This module defines util functions for interacting with Prometheus (logging metrics, etc)

use prometheus::{
    histogram_opts, register_histogram, register_int_counter, Histogram, IntCounter, Opts,
};

const LIGHTNODE_NAMESPACE: &str = "lightnode";

/// Wrapper around the prometheus `register_int_counter!` macro which also sets the lightnode
/// namespace.
pub fn register_int_counter_with_namespace(name: &str, description: &str) -> IntCounter {
    let counter_opts = Opts::new(name, description).namespace(LIGHTNODE_NAMESPACE);
    register_int_counter!(counter_opts).expect("IntCounter can be created")
}

/// Wrapper around the prometheus `register_histogram!` macro which also sets the lightnode
/// namespace.
pub fn register_histogram_with_namespace(
    name: &str,
    description: &str,
    buckets: Option<Vec<f64>>,
) -> Histogram {
    let histogram_opts = if let Some(buckets) = buckets {
        histogram_opts!(name, description, buckets).namespace(LIGHTNODE_NAMESPACE)
    } else {
        histogram_opts!(name, description).namespace(LIGHTNODE_NAMESPACE)
    };
    register_histogram!(histogram_opts).expect("Histogram can be created")
}

/// Construct the bucket interval exponentially starting from a value and an ending value.
pub fn exponential_bucket_interval(start_value: f64, end_value: f64) -> Option<Vec<f64>> {
    let quot = end_value / start_value;
    let exp = (quot.ln() / 4.0_f64.ln()).ceil() as usize;
    prometheus::exponential_buckets(start_value, 4.0, exp + 1).ok()
}

/// Construct the latencies exponentially starting from 0.001 and ending at the maximum latency
pub fn exponential_bucket_latencies(max_latency: f64) -> Option<Vec<f64>> {
    exponential_bucket_interval(0.001_f64, max_latency)
}
