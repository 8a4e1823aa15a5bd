use lazy_static::lazy_static;
use prometheus::Counter;
use prometheus::Registry;
use slog::debug;
use slog::Logger;

lazy_static! {
    pub static ref DISCOVERY_REGISTER_FAIL: Counter = Counter::new(
        "zoologist_discovery_register_fail",
        "Number of service instance registrations that failed"
    )
    .expect("Failed to create DISCOVERY_REGISTER_FAIL counter");
    pub static ref DISCOVERY_REGISTER_TOTAL: Counter = Counter::new(
        "zoologist_discovery_register_total",
        "Number of service instance registrations attempted"
    )
    .expect("Failed to create DISCOVERY_REGISTER_TOTAL counter");
    pub static ref ELECTION_PROMOTED: Counter = Counter::new(
        "zoologist_election_promoted",
        "Number of times a participant became the group leader"
    )
    .expect("Failed to create ELECTION_PROMOTED counter");
    pub static ref ELECTION_RUN_FAIL: Counter = Counter::new(
        "zoologist_election_run_fail",
        "Number of election starts that failed"
    )
    .expect("Failed to create ELECTION_RUN_FAIL counter");
    pub static ref ELECTION_RUN_TOTAL: Counter = Counter::new(
        "zoologist_election_run_total",
        "Number of election starts attempted"
    )
    .expect("Failed to create ELECTION_RUN_TOTAL counter");
    pub static ref ELECTION_TERMINATED: Counter = Counter::new(
        "zoologist_election_terminated",
        "Number of elections withdrawn because of a fatal coordinator error"
    )
    .expect("Failed to create ELECTION_TERMINATED counter");
    pub static ref ELECTION_WITHDRAW_FAIL: Counter = Counter::new(
        "zoologist_election_withdraw_fail",
        "Number of election withdrawals that failed"
    )
    .expect("Failed to create ELECTION_WITHDRAW_FAIL counter");
    pub static ref ELECTION_WITHDRAW_TOTAL: Counter = Counter::new(
        "zoologist_election_withdraw_total",
        "Number of election withdrawals attempted"
    )
    .expect("Failed to create ELECTION_WITHDRAW_TOTAL counter");
    pub static ref ENUMERATE_TIMEOUTS: Counter = Counter::new(
        "zoologist_enumerate_timeouts",
        "Number of service enumerations that ran out of time"
    )
    .expect("Failed to create ENUMERATE_TIMEOUTS counter");
    pub static ref ENUMERATE_TOTAL: Counter = Counter::new(
        "zoologist_enumerate_total",
        "Number of service enumerations started"
    )
    .expect("Failed to create ENUMERATE_TOTAL counter");
    pub static ref PROVIDER_CACHE_HIT: Counter = Counter::new(
        "zoologist_provider_cache_hit",
        "Number of instance lookups served from the listing cache"
    )
    .expect("Failed to create PROVIDER_CACHE_HIT counter");
    pub static ref PROVIDER_CACHE_MISS: Counter = Counter::new(
        "zoologist_provider_cache_miss",
        "Number of instance lookups that had to list instances from the coordinator"
    )
    .expect("Failed to create PROVIDER_CACHE_MISS counter");
    pub static ref PROVIDER_LOOKUP_TOTAL: Counter = Counter::new(
        "zoologist_provider_lookup_total",
        "Number of instance lookups performed"
    )
    .expect("Failed to create PROVIDER_LOOKUP_TOTAL counter");
    pub static ref PROVIDER_NOT_FOUND: Counter = Counter::new(
        "zoologist_provider_not_found",
        "Number of instance lookups that found no instance"
    )
    .expect("Failed to create PROVIDER_NOT_FOUND counter");
}

/// Attemps to register metrics with the Registry.
///
/// Metrics that fail to register are logged and ignored.
pub fn register_metrics(logger: &Logger, registry: &Registry) {
    let counters: [(&str, &Counter); 14] = [
        ("DISCOVERY_REGISTER_FAIL", &*DISCOVERY_REGISTER_FAIL),
        ("DISCOVERY_REGISTER_TOTAL", &*DISCOVERY_REGISTER_TOTAL),
        ("ELECTION_PROMOTED", &*ELECTION_PROMOTED),
        ("ELECTION_RUN_FAIL", &*ELECTION_RUN_FAIL),
        ("ELECTION_RUN_TOTAL", &*ELECTION_RUN_TOTAL),
        ("ELECTION_TERMINATED", &*ELECTION_TERMINATED),
        ("ELECTION_WITHDRAW_FAIL", &*ELECTION_WITHDRAW_FAIL),
        ("ELECTION_WITHDRAW_TOTAL", &*ELECTION_WITHDRAW_TOTAL),
        ("ENUMERATE_TIMEOUTS", &*ENUMERATE_TIMEOUTS),
        ("ENUMERATE_TOTAL", &*ENUMERATE_TOTAL),
        ("PROVIDER_CACHE_HIT", &*PROVIDER_CACHE_HIT),
        ("PROVIDER_CACHE_MISS", &*PROVIDER_CACHE_MISS),
        ("PROVIDER_LOOKUP_TOTAL", &*PROVIDER_LOOKUP_TOTAL),
        ("PROVIDER_NOT_FOUND", &*PROVIDER_NOT_FOUND),
    ];
    for (name, counter) in counters.iter() {
        if let Err(error) = registry.register(Box::new((*counter).clone())) {
            debug!(logger, "Failed to register {}", name; "error" => ?error);
        }
    }
    super::backend::zookeeper::register_metrics(logger, registry);
}
