//! Event bus behaviour across threads

use bridge_traits::playback::{BufferId, PlaybackSessionId};
use core_runtime::events::{CoreEvent, EventBus, QueueEvent, SessionEvent};
use std::thread;

#[tokio::test]
async fn test_publishers_on_plain_threads() {
    let bus = EventBus::new(64);
    let mut stream = bus.stream();

    let handles: Vec<_> = (0..4u64)
        .map(|raw| {
            let bus = bus.clone();
            thread::spawn(move || {
                bus.emit(QueueEvent::BufferCompleted {
                    buffer_id: BufferId::from_raw(raw),
                    queued: 0,
                })
                .ok();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut seen: Vec<u64> = Vec::new();
    for _ in 0..4 {
        match stream.recv().await.unwrap() {
            CoreEvent::Queue(QueueEvent::BufferCompleted { buffer_id, .. }) => {
                seen.push(buffer_id.as_u64())
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    seen.sort_unstable();
    assert_eq!(seen, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_terminal_filter_skips_queue_traffic() {
    let bus = EventBus::default();
    let session_id = PlaybackSessionId::new();
    let mut terminal = bus.stream().filter(CoreEvent::is_terminal);

    bus.emit(SessionEvent::Started { session_id }).unwrap();
    bus.emit(QueueEvent::ProducerBlocked {
        buffer_id: BufferId::from_raw(9),
    })
    .unwrap();
    bus.emit(SessionEvent::Failed {
        session_id,
        message: "engine stalled".into(),
    })
    .unwrap();

    let event = terminal.recv().await.unwrap();
    assert!(matches!(
        event,
        CoreEvent::Session(SessionEvent::Failed { .. })
    ));
}
