use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static CYCLES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("trust_cycles_total", "Total poll cycles per contract"),
        &["contract", "result"],
    )
    .expect("metric");
    REGISTRY.register(Box::new(c.clone())).expect("register");
    c
});

pub static REJECTIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "trust_rejections_total",
            "Outputs left out of the indices, by rejection reason",
        ),
        &["contract", "reason"],
    )
    .expect("metric");
    REGISTRY.register(Box::new(c.clone())).expect("register");
    c
});

pub static REGISTRATIONS: Lazy<IntGaugeVec> = Lazy::new(|| {
    let g = IntGaugeVec::new(
        Opts::new(
            "trust_registrations",
            "Registrations in the last published snapshot",
        ),
        &["contract"],
    )
    .expect("metric");
    REGISTRY.register(Box::new(g.clone())).expect("register");
    g
});

pub static WORKER_RESTARTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "trust_worker_restarts_total",
            "Poller restarts after a worker panic",
        ),
        &["contract"],
    )
    .expect("metric");
    REGISTRY.register(Box::new(c.clone())).expect("register");
    c
});

/// Registers every collector with [`REGISTRY`].
pub fn init() {
    Lazy::force(&CYCLES_TOTAL);
    Lazy::force(&REJECTIONS_TOTAL);
    Lazy::force(&REGISTRATIONS);
    Lazy::force(&WORKER_RESTARTS_TOTAL);
}

pub fn gather_text() -> String {
    init();
    let mf = REGISTRY.gather();
    let mut out = Vec::new();
    if TextEncoder::new().encode(&mf, &mut out).is_err() {
        return String::new();
    }
    String::from_utf8(out).unwrap_or_default()
}

pub(crate) fn saturating_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

pub(crate) fn saturating_u64(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_text_output() {
        CYCLES_TOTAL.with_label_values(&["metrics-test", "ok"]).inc();
        REGISTRATIONS.with_label_values(&["metrics-test"]).set(3);
        let text = gather_text();
        assert!(text.contains("trust_cycles_total"));
        assert!(text.contains(r#"trust_registrations{contract="metrics-test"} 3"#));
    }
}
