//! Default value functions for serde deserialization.

// Sigmas

pub fn prior_ang_sig_deg() -> f64 {
    1.0
}

pub fn prior_dist_sig() -> f64 {
    1.0
}

pub fn odo_ang_sig_deg() -> f64 {
    0.1
}

pub fn odo_dist_sig() -> f64 {
    0.1
}

pub fn buoy_dist_sig() -> f64 {
    1.0
}

pub fn rope_dist_sig() -> f64 {
    15.0
}

pub fn buoy_detect_ang_sig_deg() -> f64 {
    1.0
}

pub fn buoy_detect_dist_sig() -> f64 {
    0.1
}

pub fn rope_along_sig() -> f64 {
    15.0
}

pub fn rope_cross_sig() -> f64 {
    2.0
}

// Association

pub fn disabled_threshold() -> f64 {
    -1.0
}

pub fn landmark_cov_fallback() -> f64 {
    0.001
}

pub fn priority_window_ms() -> u64 {
    50
}

// Batching

pub fn rope_batch_by_line_timeout() -> f64 {
    100.0
}

// Map

pub fn line_depth() -> f64 {
    15.0
}

pub fn seed_line_length() -> f64 {
    10.0
}

// Estimator

pub fn max_iterations() -> u32 {
    100
}

pub fn convergence_threshold() -> f64 {
    1e-6
}

pub fn damping_factor() -> f64 {
    1e-3
}

pub fn max_active_hops() -> usize {
    0
}

pub fn conditioning_epsilon() -> f64 {
    1e-10
}

pub fn max_pending_retries() -> u32 {
    5
}

// Offline

pub fn cluster_mean_threshold() -> f64 {
    2.0
}

pub fn max_cluster_iterations() -> usize {
    100
}

// Buffer

pub fn sss_buffer_len() -> usize {
    10
}

// Shared

pub fn enabled() -> bool {
    true
}
