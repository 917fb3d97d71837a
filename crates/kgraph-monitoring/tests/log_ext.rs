use kgraph_monitoring::{init_test_tracing, LogExt};

#[derive(Debug, thiserror::Error)]
#[error("cache unreachable")]
struct Unreachable;

#[test]
fn test_log_ext_passes_results_through() {
    init_test_tracing();

    let ok: Result<u32, Unreachable> = Ok(7);
    assert_eq!(ok.log_ok("flushed").log_err("flush failed").unwrap(), 7);

    let err: Result<u32, Unreachable> = Err(Unreachable);
    let err = err.log_warn("ping failed").log_err("ping failed").unwrap_err();
    assert_eq!(err.to_string(), "cache unreachable");

    // A second initialisation is a no-op rather than a panic
    init_test_tracing();
}
