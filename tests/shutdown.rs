//! Process-wide teardown. Kept in its own test binary: after `shutdown` no
//! session can be opened anywhere in the process.

use blossom_ai::session::{self, ExecutionMode};
use blossom_ai::{Client, ErrorKind, ShutdownGuard};

#[test]
fn test_shutdown_closes_every_session_once() {
    let first = Client::builder().base_url("http://127.0.0.1:9").build().unwrap();
    let second = Client::builder().base_url("http://127.0.0.1:9").build().unwrap();
    let a = first.sessions().acquire_for(ExecutionMode::Blocking).unwrap();
    let b = second.sessions().acquire_for(ExecutionMode::Blocking).unwrap();
    let c = std::thread::scope(|s| {
        s.spawn(|| first.sessions().acquire_current().unwrap())
            .join()
            .unwrap()
    });
    assert_eq!(session::live_sessions(), 3);

    {
        let _guard = ShutdownGuard::new();
    }
    assert!(session::is_shut_down());
    assert!(a.is_closed() && b.is_closed() && c.is_closed());
    assert_eq!(session::live_sessions(), 0);
    assert_eq!(session::shutdown(), 0);

    first.close();
    let third = Client::builder().base_url("http://127.0.0.1:9").build().unwrap();
    let err = third.get("/ping").wait().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SessionClosed);
}
