use tracing::trace;

// Lightweight metrics helpers; the Prometheus recorder picks these up from
// the trace layer without pulling metrics macros into every module.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "printmuse.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn provider_call(provider: &'static str, elapsed_ms: u128) {
    trace!(
        target = "printmuse.metrics",
        provider = provider,
        elapsed_ms = elapsed_ms as u64,
        "provider_call_elapsed"
    );
}

pub fn poll_attempts(kind: &'static str, attempts: u32) {
    trace!(
        target = "printmuse.metrics",
        kind = kind,
        attempts = attempts,
        "poll_attempts_total"
    );
}
