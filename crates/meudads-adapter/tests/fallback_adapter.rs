use asupersync::runtime::RuntimeBuilder;
use asupersync::{Cx, Outcome};

use meudads_adapter::{
    AdapterHandle, BackendKind, EnvConfig, Error, FALLBACK_ADMIN_EMAIL, Value,
};

fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

fn fallback_handle(admin: bool) -> AdapterHandle {
    AdapterHandle::new(EnvConfig::default().with_fallback_admin(admin))
}

#[test]
fn missing_database_url_resolves_to_fallback() {
    let handle = fallback_handle(false);
    assert_eq!(handle.adapter().backend_kind(), BackendKind::Fallback);
}

#[test]
fn first_on_empty_result_is_none_not_error() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let adapter = fallback_handle(true).adapter();

    rt.block_on(async {
        let stmt = adapter.prepare("SELECT * FROM users WHERE email = ?");
        let row = unwrap_outcome(stmt.bind(["someone@example.com"]).first(&cx).await);
        assert!(row.is_none());
    });
}

#[test]
fn admin_login_answered_when_opted_in() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let adapter = fallback_handle(true).adapter();

    rt.block_on(async {
        let stmt = adapter.prepare("SELECT * FROM users WHERE email = ? AND active = 1");
        let row = unwrap_outcome(stmt.bind([FALLBACK_ADMIN_EMAIL]).first(&cx).await)
            .expect("synthetic administrator row");
        assert_eq!(row.text("email"), Some(FALLBACK_ADMIN_EMAIL));
        assert_eq!(row.text("role"), Some("admin"));
    });
}

#[test]
fn admin_login_stays_empty_without_opt_in() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let adapter = fallback_handle(false).adapter();

    rt.block_on(async {
        let stmt = adapter.prepare("SELECT * FROM users WHERE email = ?");
        let row = unwrap_outcome(stmt.bind([FALLBACK_ADMIN_EMAIL]).first(&cx).await);
        assert!(row.is_none());
    });
}

#[test]
fn unknown_query_shapes_return_empty_results() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let adapter = fallback_handle(true).adapter();

    rt.block_on(async {
        let stmt = adapter.prepare("SELECT * FROM clients WHERE id = ?");
        let result = unwrap_outcome(stmt.bind([Value::Int(7)]).all(&cx).await);
        assert!(result.is_empty());
        assert_eq!(result.meta.rows_read, 0);
    });
}

#[test]
fn run_reports_estimated_changes_on_fallback() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let adapter = fallback_handle(false).adapter();

    rt.block_on(async {
        let stmt = adapter.prepare("UPDATE users SET name = ? WHERE id = ?");
        let ack = unwrap_outcome(stmt.bind(["Alice", "u1"]).run(&cx).await);
        assert!(ack.success);
        // The fallback has no native count; the leading-keyword
        // heuristic reports at least one change.
        assert!(ack.meta.changes_estimated);
        assert_eq!(ack.changes(), 1);
    });
}

#[test]
fn parameter_count_mismatch_is_rejected_client_side() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let adapter = fallback_handle(false).adapter();

    rt.block_on(async {
        let stmt = adapter.prepare("SELECT * FROM users WHERE email = ? AND active = ?");
        let outcome = stmt.bind(["a@b.com"]).first(&cx).await;
        match outcome {
            Outcome::Err(Error::Query(q)) => {
                assert!(q.message.contains("expects 2 parameters"));
            }
            other => panic!("expected parameter-count error, got {other:?}"),
        }
    });
}

#[test]
fn statements_without_placeholders_run_directly() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let adapter = fallback_handle(false).adapter();

    rt.block_on(async {
        let stmt = adapter.prepare("SELECT * FROM roles");
        let result = unwrap_outcome(stmt.all(&cx).await);
        assert!(result.is_empty());
        let ack = unwrap_outcome(adapter.prepare("DELETE FROM sessions").run(&cx).await);
        assert!(ack.success);
    });
}
