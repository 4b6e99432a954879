use hostctl::core::dispatch::PerHostQueue;
use hostctl::core::ingress::HostMessage;

fn message(command: &str) -> HostMessage {
    HostMessage {
        server_name: "blue-flag".into(),
        command: command.into(),
        payload: serde_json::Value::Null,
    }
}

#[test]
fn preserves_fifo_order() {
    let queue = PerHostQueue::new();
    queue.push(message("playerJoin"));
    queue.push(message("missionStart"));
    queue.push(message("playerLeave"));

    assert_eq!(queue.pop().unwrap().command, "playerJoin");
    assert_eq!(queue.pop().unwrap().command, "missionStart");
    assert_eq!(queue.pop().unwrap().command, "playerLeave");
    assert!(queue.pop().is_none());
}

#[test]
fn is_empty_reflects_pending_contents() {
    let queue = PerHostQueue::new();
    assert!(queue.is_empty());
    queue.push(message("heartbeat"));
    assert!(!queue.is_empty());
    queue.pop();
    assert!(queue.is_empty());
}

#[test]
fn draining_flag_is_exclusive() {
    let queue = PerHostQueue::new();
    assert!(queue.begin_draining());
    assert!(!queue.begin_draining());
    queue.end_draining();
    assert!(queue.begin_draining());
}
